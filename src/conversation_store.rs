//! Per-lead conversation log.
//!
//! Messages are append-only and keyed by the provider's message sid; the only
//! mutation allowed afterwards is a delivery-status update.
use crate::errors::AppError;
use crate::models::{ConversationMessage, ConversationRow, DeliveryStatus, NewConversationMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::fmt;
use std::sync::Mutex;

/// Failures raised by a conversation store.
#[derive(Debug)]
pub enum StoreError {
    /// A message with this provider sid is already stored.
    DuplicateMessage(String),
    /// The backing database failed.
    Database(sqlx::Error),
    /// A stored row could not be mapped back into a message.
    InvalidRow(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DuplicateMessage(sid) => write!(f, "Duplicate message sid: {}", sid),
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::InvalidRow(msg) => write!(f, "Invalid conversation row: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => AppError::DatabaseError(e),
            other => AppError::InternalError(other.to_string()),
        }
    }
}

/// System of record for conversation history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Stores a new message. Fails with `DuplicateMessage` if the sid exists.
    async fn append(&self, msg: NewConversationMessage)
        -> Result<ConversationMessage, StoreError>;

    /// Applies a delivery status to the message with this sid.
    ///
    /// Returns `Ok(false)` when no such message exists yet or nothing changed.
    async fn update_status(
        &self,
        message_sid: &str,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Up to `limit` messages for the lead, most recent first.
    async fn recent_history(
        &self,
        lead_id: i64,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, StoreError>;

    /// The full conversation for the lead, oldest first.
    async fn history(&self, lead_id: i64) -> Result<Vec<ConversationMessage>, StoreError>;
}

const SELECT_COLUMNS: &str = "id, lead_id, message_sid, direction, message, status, \
     from_address, to_address, delivered_at, read_at, created_at";

fn into_message(row: ConversationRow) -> Result<ConversationMessage, StoreError> {
    ConversationMessage::try_from(row).map_err(StoreError::InvalidRow)
}

/// Postgres-backed store over the `lead_conversations` table.
#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn append(
        &self,
        msg: NewConversationMessage,
    ) -> Result<ConversationMessage, StoreError> {
        // The unique constraint on message_sid decides concurrent redeliveries.
        let sql = format!(
            r#"
            INSERT INTO lead_conversations
                (lead_id, message_sid, direction, message, status, from_address, to_address)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (message_sid) DO NOTHING
            RETURNING {}
            "#,
            SELECT_COLUMNS
        );

        let row = sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(msg.lead_id)
            .bind(&msg.message_sid)
            .bind(msg.direction.as_str())
            .bind(&msg.message)
            .bind(msg.status.as_str())
            .bind(&msg.from)
            .bind(&msg.to)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                tracing::debug!(
                    "Stored {} message sid={} for lead_id={}",
                    msg.direction,
                    msg.message_sid,
                    msg.lead_id
                );
                into_message(row)
            }
            None => Err(StoreError::DuplicateMessage(msg.message_sid)),
        }
    }

    async fn update_status(
        &self,
        message_sid: &str,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM lead_conversations WHERE message_sid = $1 FOR UPDATE",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(message_sid)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tracing::debug!("No stored message for status callback sid={}", message_sid);
            return Ok(false);
        };

        let mut message = into_message(row)?;
        if !message.apply_status(status, at) {
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE lead_conversations
            SET status = $2, delivered_at = $3, read_at = $4, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(message.id)
        .bind(message.status.as_str())
        .bind(message.delivered_at)
        .bind(message.read_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn recent_history(
        &self,
        lead_id: i64,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, StoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM lead_conversations
            WHERE lead_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
            SELECT_COLUMNS
        );

        sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(lead_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(into_message)
            .collect()
    }

    async fn history(&self, lead_id: i64) -> Result<Vec<ConversationMessage>, StoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM lead_conversations
            WHERE lead_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
            SELECT_COLUMNS
        );

        sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(lead_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(into_message)
            .collect()
    }
}

/// In-process store, ordered by insertion. Used for local runs and tests.
#[derive(Default)]
pub struct MemoryConversationStore {
    messages: Mutex<Vec<ConversationMessage>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored message, oldest first.
    pub fn all(&self) -> Vec<ConversationMessage> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ConversationMessage>> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn append(
        &self,
        msg: NewConversationMessage,
    ) -> Result<ConversationMessage, StoreError> {
        let mut messages = self.lock();
        if messages.iter().any(|m| m.message_sid == msg.message_sid) {
            return Err(StoreError::DuplicateMessage(msg.message_sid));
        }

        let stored = ConversationMessage {
            id: messages.len() as i64 + 1,
            lead_id: msg.lead_id,
            message_sid: msg.message_sid,
            direction: msg.direction,
            message: msg.message,
            status: msg.status,
            from: msg.from,
            to: msg.to,
            delivered_at: None,
            read_at: None,
            created_at: Utc::now(),
        };
        messages.push(stored.clone());
        Ok(stored)
    }

    async fn update_status(
        &self,
        message_sid: &str,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut messages = self.lock();
        Ok(messages
            .iter_mut()
            .find(|m| m.message_sid == message_sid)
            .map(|m| m.apply_status(status, at))
            .unwrap_or(false))
    }

    async fn recent_history(
        &self,
        lead_id: i64,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .rev()
            .filter(|m| m.lead_id == lead_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn history(&self, lead_id: i64) -> Result<Vec<ConversationMessage>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .filter(|m| m.lead_id == lead_id)
            .cloned()
            .collect())
    }
}
