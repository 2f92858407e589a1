use crate::errors::AppError;
use crate::models::DeliveryStatus;
use crate::phone;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Channel label placed in front of WhatsApp addresses.
pub const WHATSAPP_PREFIX: &str = "whatsapp:";

/// Wraps a number as a WhatsApp address, leaving already-wrapped input alone.
pub fn whatsapp_address(number: &str) -> String {
    if number.starts_with(WHATSAPP_PREFIX) {
        number.to_string()
    } else {
        format!("{}{}", WHATSAPP_PREFIX, number)
    }
}

/// A message accepted by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    /// Provider-assigned message id.
    pub sid: String,
    /// Provider status at acceptance time (e.g. "queued").
    pub status: String,
    /// Channel-prefixed recipient actually used.
    pub to: String,
    /// Channel-prefixed sender.
    pub from: String,
}

impl SentMessage {
    pub fn delivery_status(&self) -> DeliveryStatus {
        DeliveryStatus::from_provider(&self.status).unwrap_or(DeliveryStatus::Sent)
    }
}

/// Why the provider did not accept a message.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewaySendFailure {
    /// The provider answered with an error (invalid number, auth, rate limit).
    Rejected {
        http_status: u16,
        code: Option<i64>,
        message: String,
    },
    /// The request did not complete.
    Transport(String),
    /// The provider answered 2xx without a usable message id.
    InvalidResponse(String),
}

impl fmt::Display for GatewaySendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewaySendFailure::Rejected {
                http_status,
                code,
                message,
            } => match code {
                Some(code) => write!(f, "Provider rejected message ({} / code {}): {}", http_status, code, message),
                None => write!(f, "Provider rejected message ({}): {}", http_status, message),
            },
            GatewaySendFailure::Transport(msg) => write!(f, "Provider request failed: {}", msg),
            GatewaySendFailure::InvalidResponse(msg) => {
                write!(f, "Unexpected provider response: {}", msg)
            }
        }
    }
}

impl std::error::Error for GatewaySendFailure {}

impl From<GatewaySendFailure> for AppError {
    fn from(err: GatewaySendFailure) -> Self {
        AppError::ExternalApiError(err.to_string())
    }
}

/// Outbound messaging provider.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Sends `body` to `to`, returning the provider's message id on acceptance.
    async fn send(&self, to: &str, body: &str) -> Result<SentMessage, GatewaySendFailure>;
}

#[derive(Debug, Deserialize)]
struct TwilioMessage {
    sid: Option<String>,
    status: Option<String>,
    error_code: Option<i64>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TwilioError {
    code: Option<i64>,
    message: Option<String>,
}

/// Client for Twilio's Programmable Messaging API over WhatsApp.
#[derive(Clone)]
pub struct TwilioGateway {
    client: reqwest::Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    status_callback_url: Option<String>,
    country_code: String,
}

impl TwilioGateway {
    /// Creates a new `TwilioGateway`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, normally `https://api.twilio.com`.
    /// * `account_sid` / `auth_token` - Basic auth credentials.
    /// * `from_number` - Our WhatsApp sender number.
    /// * `country_code` - Default country code for bare local recipients.
    pub fn new(
        base_url: String,
        account_sid: String,
        auth_token: String,
        from_number: String,
        country_code: String,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create Twilio client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_sid,
            auth_token,
            from_number,
            status_callback_url: None,
            country_code,
        })
    }

    /// Asks the provider to report delivery updates to `url`.
    pub fn with_status_callback(mut self, url: Option<String>) -> Self {
        self.status_callback_url = url;
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        )
    }
}

#[async_trait]
impl MessageGateway for TwilioGateway {
    async fn send(&self, to: &str, body: &str) -> Result<SentMessage, GatewaySendFailure> {
        let whatsapp_to = whatsapp_address(&phone::format_recipient(to, &self.country_code));
        let whatsapp_from = whatsapp_address(&self.from_number);
        tracing::info!("Sending WhatsApp message to {}", whatsapp_to);
        tracing::debug!("Message body: {}", body);

        let mut form = vec![
            ("To", whatsapp_to.as_str()),
            ("From", whatsapp_from.as_str()),
            ("Body", body),
        ];
        if let Some(ref callback) = self.status_callback_url {
            form.push(("StatusCallback", callback.as_str()));
        }

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Twilio request failed: {}", e);
                GatewaySendFailure::Transport(e.to_string())
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let parsed: Option<TwilioError> = serde_json::from_str(&text).ok();
            let failure = GatewaySendFailure::Rejected {
                http_status: status.as_u16(),
                code: parsed.as_ref().and_then(|e| e.code),
                message: parsed
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| if text.is_empty() { "Unknown error".to_string() } else { text }),
            };
            tracing::error!("Twilio rejected message to {}: {}", whatsapp_to, failure);
            return Err(failure);
        }

        let message: TwilioMessage = serde_json::from_str(&text).map_err(|e| {
            GatewaySendFailure::InvalidResponse(format!("Failed to parse Twilio response: {}", e))
        })?;

        let sid = message
            .sid
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewaySendFailure::InvalidResponse("missing 'sid' field".to_string()))?;
        let status = message.status.unwrap_or_else(|| "queued".to_string());

        tracing::info!(
            "✓ WhatsApp message sent: sid={}, status={}, error_code={:?}, error_message={:?}",
            sid,
            status,
            message.error_code,
            message.error_message
        );

        Ok(SentMessage {
            sid,
            status,
            to: whatsapp_to,
            from: whatsapp_from,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        let client = TwilioGateway::new(
            "https://api.twilio.com/".to_string(),
            "AC123".to_string(),
            "token".to_string(),
            "+14155238886".to_string(),
            "91".to_string(),
        );
        assert!(client.is_ok());
        assert_eq!(
            client.unwrap().messages_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[test]
    fn test_whatsapp_address() {
        assert_eq!(whatsapp_address("+919876543210"), "whatsapp:+919876543210");
        assert_eq!(whatsapp_address("whatsapp:+919876543210"), "whatsapp:+919876543210");
    }

    #[test]
    fn test_failure_display_includes_code() {
        let failure = GatewaySendFailure::Rejected {
            http_status: 400,
            code: Some(21211),
            message: "Invalid 'To' Phone Number".to_string(),
        };
        assert_eq!(
            failure.to_string(),
            "Provider rejected message (400 / code 21211): Invalid 'To' Phone Number"
        );
    }
}
