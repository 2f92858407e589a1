use crate::errors::AppError;
use crate::models::{is_phone_label, Lead, LeadAttribute, PHONE_LABELS};
use crate::phone;
use async_trait::async_trait;
use moka::future::Cache;
use serde_json::Value;
use sqlx::PgPool;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Read access to stored leads.
///
/// Phone lookups only consider attributes whose label is in `PHONE_LABELS`.
/// When several leads match, the lowest lead id wins.
#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Lead>, AppError>;

    /// Lead with a phone attribute whose trimmed value equals `value`.
    async fn find_by_phone_value(&self, value: &str) -> Result<Option<Lead>, AppError>;

    /// Lead with a phone attribute whose digits contain `digits`.
    async fn find_by_phone_digits_containing(
        &self,
        digits: &str,
    ) -> Result<Option<Lead>, AppError>;
}

/// Builds attributes from the stored `lead_data` JSON.
///
/// Values may have been saved as numbers; entries without a name are skipped.
pub fn attributes_from_json(lead_data: &Value) -> Vec<LeadAttribute> {
    let Some(entries) = lead_data.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("field_name")?.as_str()?;
            let value = match entry.get("field_value") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            Some(LeadAttribute::new(name, value))
        })
        .collect()
}

/// Postgres-backed lead store over `leads.lead_data`.
#[derive(Clone)]
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn phone_labels() -> Vec<String> {
        PHONE_LABELS.iter().map(|l| l.to_string()).collect()
    }

    fn to_lead(row: Option<(i64, Value)>) -> Option<Lead> {
        row.map(|(id, data)| Lead {
            id,
            attributes: attributes_from_json(&data),
        })
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Lead>, AppError> {
        let row = sqlx::query_as::<_, (i64, Value)>("SELECT id, lead_data FROM leads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(Self::to_lead(row))
    }

    async fn find_by_phone_value(&self, value: &str) -> Result<Option<Lead>, AppError> {
        let row = sqlx::query_as::<_, (i64, Value)>(
            r#"
            SELECT l.id, l.lead_data
            FROM leads l
            WHERE jsonb_typeof(l.lead_data) = 'array'
              AND EXISTS (
                SELECT 1 FROM jsonb_array_elements(l.lead_data) AS f
                WHERE lower(btrim(f->>'field_name')) = ANY($2)
                  AND btrim(f->>'field_value') = $1
              )
            ORDER BY l.id ASC
            LIMIT 1
            "#,
        )
        .bind(value)
        .bind(Self::phone_labels())
        .fetch_optional(&self.pool)
        .await?;

        Ok(Self::to_lead(row))
    }

    async fn find_by_phone_digits_containing(
        &self,
        digits: &str,
    ) -> Result<Option<Lead>, AppError> {
        let row = sqlx::query_as::<_, (i64, Value)>(
            r#"
            SELECT l.id, l.lead_data
            FROM leads l
            WHERE jsonb_typeof(l.lead_data) = 'array'
              AND EXISTS (
                SELECT 1 FROM jsonb_array_elements(l.lead_data) AS f
                WHERE lower(btrim(f->>'field_name')) = ANY($2)
                  AND regexp_replace(f->>'field_value', '\D', '', 'g') LIKE '%' || $1 || '%'
              )
            ORDER BY l.id ASC
            LIMIT 1
            "#,
        )
        .bind(digits)
        .bind(Self::phone_labels())
        .fetch_optional(&self.pool)
        .await?;

        Ok(Self::to_lead(row))
    }
}

/// In-process lead store. Iteration is by ascending lead id.
#[derive(Default)]
pub struct MemoryLeadStore {
    leads: Mutex<Vec<Lead>>,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, lead: Lead) {
        let mut leads = self.leads.lock().unwrap_or_else(|p| p.into_inner());
        leads.retain(|l| l.id != lead.id);
        leads.push(lead);
        leads.sort_by_key(|l| l.id);
    }

    fn find(&self, matches: impl Fn(&LeadAttribute) -> bool) -> Option<Lead> {
        let leads = self.leads.lock().unwrap_or_else(|p| p.into_inner());
        leads
            .iter()
            .find(|lead| {
                lead.attributes
                    .iter()
                    .any(|a| is_phone_label(&a.field_name) && matches(a))
            })
            .cloned()
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Lead>, AppError> {
        let leads = self.leads.lock().unwrap_or_else(|p| p.into_inner());
        Ok(leads.iter().find(|l| l.id == id).cloned())
    }

    async fn find_by_phone_value(&self, value: &str) -> Result<Option<Lead>, AppError> {
        Ok(self.find(|a| a.field_value.trim() == value))
    }

    async fn find_by_phone_digits_containing(
        &self,
        digits: &str,
    ) -> Result<Option<Lead>, AppError> {
        Ok(self.find(|a| phone::digits(&a.field_value).contains(digits)))
    }
}

/// Maps an inbound sender address to the lead that owns it.
#[derive(Clone)]
pub struct LeadResolver {
    store: Arc<dyn LeadStore>,
    cache: Cache<String, Lead>,
    country_code: String,
    timeout: Duration,
}

impl LeadResolver {
    pub fn new(store: Arc<dyn LeadStore>, country_code: impl Into<String>, timeout: Duration) -> Self {
        // Only positive matches are cached; a miss may become a hit once the lead is imported.
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(600))
            .max_capacity(10_000)
            .build();

        Self {
            store,
            cache,
            country_code: country_code.into(),
            timeout,
        }
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| AppError::Timeout(format!("lead store {} exceeded {:?}", what, self.timeout)))?
    }

    /// Finds the lead for `inbound_address`, or `None` if nobody matches.
    ///
    /// Exact matches are tried per candidate key in priority order. If none
    /// hit, one looser search looks for the last ten digits inside any phone
    /// attribute. That fallback needs a full ten-digit key.
    pub async fn resolve(&self, inbound_address: &str) -> Result<Option<Lead>, AppError> {
        let cache_key = phone::strip_channel_prefix(inbound_address).to_string();
        if let Some(lead) = self.cache.get(&cache_key).await {
            tracing::debug!("Lead cache hit for {}: lead_id={}", cache_key, lead.id);
            return Ok(Some(lead));
        }

        let candidates = phone::candidate_keys(inbound_address, &self.country_code);
        tracing::debug!("Searching lead by phone formats: {:?}", candidates);

        let mut found = None;
        for candidate in &candidates {
            if let Some(lead) = self
                .bounded("exact lookup", self.store.find_by_phone_value(candidate))
                .await?
            {
                tracing::debug!("Lead {} matched candidate {}", lead.id, candidate);
                found = Some(lead);
                break;
            }
        }

        if found.is_none() {
            let last_ten = phone::last_ten_digits(inbound_address);
            if last_ten.len() == phone::LOCAL_DIGITS {
                tracing::debug!("Trying flexible phone search for {}", last_ten);
                found = self
                    .bounded(
                        "substring lookup",
                        self.store.find_by_phone_digits_containing(&last_ten),
                    )
                    .await?;
            }
        }

        if let Some(ref lead) = found {
            self.cache.insert(cache_key, lead.clone()).await;
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lead(id: i64, attrs: &[(&str, &str)]) -> Lead {
        Lead {
            id,
            attributes: attrs
                .iter()
                .map(|(name, value)| LeadAttribute::new(*name, *value))
                .collect(),
        }
    }

    fn resolver(store: Arc<MemoryLeadStore>) -> LeadResolver {
        LeadResolver::new(store, "91", Duration::from_secs(1))
    }

    #[test]
    fn test_attributes_from_json_tolerates_numbers() {
        let data = json!([
            {"field_name": "Name", "field_value": "Ravi"},
            {"field_name": "Phone", "field_value": 9876543210u64},
            {"field_value": "orphan"},
            {"field_name": "Notes", "field_value": null}
        ]);
        let attrs = attributes_from_json(&data);
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[1].field_value, "9876543210");
        assert_eq!(attrs[2].field_value, "");
        assert!(attributes_from_json(&json!({"not": "an array"})).is_empty());
    }

    #[tokio::test]
    async fn test_resolves_raw_ten_digit_value() {
        let store = Arc::new(MemoryLeadStore::new());
        store.insert(lead(1, &[("Phone", "4155552671")]));

        let found = resolver(store).resolve("whatsapp:+14155552671").await.unwrap();
        assert_eq!(found.map(|l| l.id), Some(1));
    }

    #[tokio::test]
    async fn test_candidate_priority_beats_lead_id() {
        let store = Arc::new(MemoryLeadStore::new());
        store.insert(lead(1, &[("Mobile", "+919876543210")]));
        store.insert(lead(2, &[("Phone", "9876543210")]));

        let found = resolver(store).resolve("whatsapp:+919876543210").await.unwrap();
        assert_eq!(found.map(|l| l.id), Some(2));
    }

    #[tokio::test]
    async fn test_ties_break_on_lowest_id() {
        let store = Arc::new(MemoryLeadStore::new());
        store.insert(lead(9, &[("Phone", "9876543210")]));
        store.insert(lead(4, &[("WhatsApp", "9876543210")]));

        let found = resolver(store).resolve("whatsapp:+919876543210").await.unwrap();
        assert_eq!(found.map(|l| l.id), Some(4));
    }

    #[tokio::test]
    async fn test_substring_fallback() {
        let store = Arc::new(MemoryLeadStore::new());
        store.insert(lead(3, &[("Contact", "Call me at 98765-43210 please")]));

        let found = resolver(store).resolve("whatsapp:+919876543210").await.unwrap();
        assert_eq!(found.map(|l| l.id), Some(3));
    }

    #[tokio::test]
    async fn test_non_phone_attributes_are_ignored() {
        let store = Arc::new(MemoryLeadStore::new());
        store.insert(lead(5, &[("Referral Code", "9876543210")]));

        let found = resolver(store).resolve("whatsapp:+919876543210").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_short_address_skips_fallback() {
        let store = Arc::new(MemoryLeadStore::new());
        store.insert(lead(6, &[("Phone", "555-12345-000")]));

        let found = resolver(store).resolve("whatsapp:12345").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_no_match() {
        let store = Arc::new(MemoryLeadStore::new());
        store.insert(lead(1, &[("Phone", "9876543210")]));

        let found = resolver(store).resolve("whatsapp:+12025550123").await.unwrap();
        assert!(found.is_none());
    }
}
