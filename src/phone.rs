//! Phone number normalization for WhatsApp addresses.
//!
//! Inbound addresses arrive as `whatsapp:+<countrycode><number>`, while lead
//! records store numbers however the intake form captured them. This module
//! turns one address into the ordered set of spellings worth looking up, and
//! formats recipient numbers for the messaging provider.
use phonenumber::Mode;
use regex::Regex;
use std::sync::OnceLock;

/// Country code assumed for bare local numbers.
pub const DEFAULT_COUNTRY_CODE: &str = "91";

/// Number of trailing digits that identify a subscriber number.
pub const LOCAL_DIGITS: usize = 10;

/// Removes a leading `channel:` label such as `whatsapp:`.
pub fn strip_channel_prefix(addr: &str) -> &str {
    let addr = addr.trim();
    match addr.find(':') {
        Some(idx) => addr[idx + 1..].trim(),
        None => addr,
    }
}

/// Keeps ASCII digits only.
pub fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// The last ten digits of the address, or all of them if there are fewer.
pub fn last_ten_digits(addr: &str) -> String {
    let all = digits(strip_channel_prefix(addr));
    let start = all.len().saturating_sub(LOCAL_DIGITS);
    all[start..].to_string()
}

/// Lookup spellings for an inbound address, most specific first.
///
/// Order: last ten digits, the same with `+`, the address as received, the
/// address without `+`, then the last ten digits behind the default country
/// code without and with `+`. Duplicates are removed keeping the first
/// occurrence. Never fails; short inputs yield best-effort keys.
pub fn candidate_keys(addr: &str, country_code: &str) -> Vec<String> {
    let extracted = strip_channel_prefix(addr);
    let last_ten = last_ten_digits(addr);

    let raw = [
        last_ten.clone(),
        format!("+{}", last_ten),
        extracted.to_string(),
        extracted.replace('+', ""),
        format!("{}{}", country_code, last_ten),
        format!("+{}{}", country_code, last_ten),
    ];

    let mut keys: Vec<String> = Vec::with_capacity(raw.len());
    for key in raw {
        if key.is_empty() || key == "+" || keys.contains(&key) {
            continue;
        }
        keys.push(key);
    }
    keys
}

fn non_dial_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^0-9+]").expect("static regex"))
}

/// Formats a recipient number for transmission to the provider.
///
/// Bare ten-digit numbers and `+` followed by ten digits get the country code;
/// numbers already carrying the country code get a leading `+`. When the
/// result is a valid international number it is emitted in E.164.
pub fn format_recipient(raw: &str, country_code: &str) -> String {
    let phone = non_dial_chars()
        .replace_all(strip_channel_prefix(raw), "")
        .to_string();
    let digit_count = phone.trim_start_matches('+').len();
    let has_plus = phone.starts_with('+');
    let all_digits = phone.trim_start_matches('+').chars().all(|c| c.is_ascii_digit());

    let formatted = if !has_plus
        && all_digits
        && phone.starts_with(country_code)
        && digit_count == country_code.len() + LOCAL_DIGITS
    {
        format!("+{}", phone)
    } else if !has_plus && all_digits && digit_count == LOCAL_DIGITS {
        format!("+{}{}", country_code, phone)
    } else if has_plus && all_digits && digit_count == LOCAL_DIGITS {
        format!("+{}{}", country_code, &phone[1..])
    } else if !has_plus && all_digits && phone.starts_with(country_code) {
        format!("+{}", phone)
    } else {
        phone
    };

    match phonenumber::parse(None, &formatted) {
        Ok(number) if phonenumber::is_valid(&number) => {
            number.format().mode(Mode::E164).to_string()
        }
        _ => {
            tracing::debug!("Recipient {} kept as formatted: {}", raw, formatted);
            formatted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_channel_prefix() {
        assert_eq!(strip_channel_prefix("whatsapp:+14155552671"), "+14155552671");
        assert_eq!(strip_channel_prefix("+14155552671"), "+14155552671");
        assert_eq!(strip_channel_prefix(" sms: 9876543210 "), "9876543210");
    }

    #[test]
    fn test_candidate_keys_us_number() {
        let keys = candidate_keys("whatsapp:+14155552671", "91");
        assert_eq!(
            keys,
            vec![
                "4155552671",
                "+4155552671",
                "+14155552671",
                "14155552671",
                "914155552671",
                "+914155552671",
            ]
        );
    }

    #[test]
    fn test_candidate_keys_deduplicate_home_country() {
        let keys = candidate_keys("whatsapp:+919876543210", "91");
        assert_eq!(
            keys,
            vec!["9876543210", "+9876543210", "+919876543210", "919876543210"]
        );
    }

    #[test]
    fn test_candidate_keys_short_input_is_best_effort() {
        let keys = candidate_keys("whatsapp:12345", "91");
        assert_eq!(keys, vec!["12345", "+12345", "9112345", "+9112345"]);
        assert!(candidate_keys("", "91").iter().all(|k| !k.is_empty()));
    }

    #[test]
    fn test_format_recipient_rules() {
        assert_eq!(format_recipient("9876543210", "91"), "+919876543210");
        assert_eq!(format_recipient("+9876543210", "91"), "+919876543210");
        assert_eq!(format_recipient("919876543210", "91"), "+919876543210");
        assert_eq!(format_recipient("whatsapp:+919876543210", "91"), "+919876543210");
        assert_eq!(format_recipient("(987) 654-3210", "91"), "+919876543210");
    }
}
