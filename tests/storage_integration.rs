use chrono::Utc;
use serde_json::json;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use lead_conversation_api::conversation_store::{
    ConversationStore, PgConversationStore, StoreError,
};
use lead_conversation_api::db::Database;
use lead_conversation_api::lead_resolver::{LeadResolver, PgLeadStore};
use lead_conversation_api::models::{DeliveryStatus, Direction, NewConversationMessage};

/// Integration smoke test for the Postgres lead and conversation stores.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn conversation_store_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;

    // Unique suffix so repeated runs do not collide on phone or sid.
    let suffix = Utc::now().timestamp_micros().rem_euclid(100_000_000);
    let local = format!("98{:08}", suffix);
    let lead_id: i64 = sqlx::query_scalar(
        "INSERT INTO leads (campaign_id, lead_data) VALUES ($1, $2) RETURNING id",
    )
    .bind(1_i64)
    .bind(json!([
        {"field_name": "Full Name", "field_value": "Smoke Test"},
        {"field_name": "Mobile Number", "field_value": local.clone()}
    ]))
    .fetch_one(&db.pool)
    .await?;

    let resolver = LeadResolver::new(
        Arc::new(PgLeadStore::new(db.pool.clone())),
        "91",
        Duration::from_secs(5),
    );
    let found = resolver
        .resolve(&format!("whatsapp:+91{}", local))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(found.map(|l| l.id), Some(lead_id));

    let store = PgConversationStore::new(db.pool.clone());
    let sid = format!("SMsmoke{}", suffix);
    let new_message = NewConversationMessage {
        lead_id,
        message_sid: sid.clone(),
        direction: Direction::Outbound,
        message: "Hello from the smoke test".to_string(),
        status: DeliveryStatus::Sent,
        from: "whatsapp:+14155238886".to_string(),
        to: format!("whatsapp:+91{}", local),
    };

    let stored = store.append(new_message.clone()).await?;
    assert_eq!(stored.message_sid, sid);
    assert!(matches!(
        store.append(new_message).await,
        Err(StoreError::DuplicateMessage(_))
    ));

    assert!(store.update_status(&sid, DeliveryStatus::Read, Utc::now()).await?);
    assert!(!store.update_status(&sid, DeliveryStatus::Failed, Utc::now()).await?);

    let history = store.history(lead_id).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, DeliveryStatus::Read);

    sqlx::query("DELETE FROM leads WHERE id = $1")
        .bind(lead_id)
        .execute(&db.pool)
        .await?;
    Ok(())
}
