//! Inbound WhatsApp pipeline.
//!
//! Each inbound message moves through
//! `RECEIVED → LEAD_RESOLVED → HISTORY_LOADED → REPLY_GENERATED → SENT → PERSISTED`
//! and may stop early as `REJECTED`, `DROPPED`, `DUPLICATE` or `PARTIAL`.
//! Only store failures before the reply is generated surface as errors.
use crate::conversation_store::{ConversationStore, StoreError};
use crate::errors::{AppError, ResultExt};
use crate::gateway_client::MessageGateway;
use crate::lead_resolver::LeadResolver;
use crate::models::{ChatTurn, DeliveryStatus, Direction, NewConversationMessage};
use crate::reply_generator::{ReplyGenerator, HISTORY_WINDOW};
use crate::webhook_models::{InboundMessagePayload, StatusCallbackPayload};
use chrono::Utc;
use std::sync::Arc;

/// Inbound message after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub message_sid: String,
    pub from: String,
    pub to: String,
    pub body: String,
}

impl InboundMessage {
    /// Validates the provider payload; sender and message sid are required.
    pub fn from_payload(payload: InboundMessagePayload) -> Result<Self, String> {
        let message_sid = payload
            .message_sid
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "missing MessageSid".to_string())?;
        let from = payload
            .from
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "missing From".to_string())?;

        Ok(Self {
            message_sid,
            from,
            to: payload.to.unwrap_or_default().trim().to_string(),
            body: payload.body.unwrap_or_default(),
        })
    }
}

/// Terminal state of one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Required fields were missing; nothing was stored.
    Rejected { reason: String },
    /// No lead owns the sender address.
    Dropped,
    /// The message sid was already stored; no reply was produced.
    Duplicate { lead_id: i64 },
    /// The inbound leg is stored but the reply was not sent or not recorded.
    Partial { lead_id: i64, reason: String },
    /// Inbound and outbound messages are both stored.
    Persisted { lead_id: i64, reply_sid: String },
}

impl PipelineOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "REJECTED",
            Self::Dropped => "DROPPED",
            Self::Duplicate { .. } => "DUPLICATE",
            Self::Partial { .. } => "PARTIAL",
            Self::Persisted { .. } => "PERSISTED",
        }
    }

    /// Whether the provider should be told the message was handled successfully.
    pub fn acknowledged(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Wires lead resolution, history, reply generation and sending together.
#[derive(Clone)]
pub struct WebhookOrchestrator {
    resolver: LeadResolver,
    store: Arc<dyn ConversationStore>,
    replies: ReplyGenerator,
    gateway: Arc<dyn MessageGateway>,
}

impl WebhookOrchestrator {
    pub fn new(
        resolver: LeadResolver,
        store: Arc<dyn ConversationStore>,
        replies: ReplyGenerator,
        gateway: Arc<dyn MessageGateway>,
    ) -> Self {
        Self {
            resolver,
            store,
            replies,
            gateway,
        }
    }

    /// Runs the pipeline for one inbound message.
    pub async fn handle_inbound(
        &self,
        payload: InboundMessagePayload,
    ) -> Result<PipelineOutcome, AppError> {
        // RECEIVED
        let inbound = match InboundMessage::from_payload(payload) {
            Ok(inbound) => inbound,
            Err(reason) => {
                tracing::warn!("Rejected inbound webhook: {}", reason);
                return Ok(PipelineOutcome::Rejected { reason });
            }
        };
        tracing::info!(
            "Inbound message sid={} from={}",
            inbound.message_sid,
            inbound.from
        );

        // LEAD_RESOLVED
        let lead = match self
            .resolver
            .resolve(&inbound.from)
            .await
            .context("Resolving lead for inbound message")?
        {
            Some(lead) => lead,
            None => {
                tracing::warn!(
                    "No lead found for incoming message sid={} from={}",
                    inbound.message_sid,
                    inbound.from
                );
                return Ok(PipelineOutcome::Dropped);
            }
        };

        let stored = self
            .store
            .append(NewConversationMessage {
                lead_id: lead.id,
                message_sid: inbound.message_sid.clone(),
                direction: Direction::Inbound,
                message: inbound.body.clone(),
                status: DeliveryStatus::Received,
                from: inbound.from.clone(),
                to: inbound.to.clone(),
            })
            .await;
        match stored {
            Ok(msg) => tracing::debug!("Stored inbound message id={} lead_id={}", msg.id, lead.id),
            Err(StoreError::DuplicateMessage(sid)) => {
                tracing::info!("Duplicate delivery of sid={}, skipping reply", sid);
                return Ok(PipelineOutcome::Duplicate { lead_id: lead.id });
            }
            Err(e) => {
                return Err(AppError::from(e)).context("Storing inbound message");
            }
        }

        // HISTORY_LOADED
        let mut recent = self
            .store
            .recent_history(lead.id, HISTORY_WINDOW + 1)
            .await
            .map_err(AppError::from)
            .context("Loading conversation history")?;
        recent.retain(|m| m.message_sid != inbound.message_sid);
        recent.truncate(HISTORY_WINDOW);
        recent.reverse();
        let prior_turns: Vec<ChatTurn> = recent.iter().map(ChatTurn::from).collect();

        // REPLY_GENERATED
        let reply = self.replies.generate(&inbound.body, &prior_turns).await;

        // SENT
        let sent = match self.gateway.send(&inbound.from, &reply).await {
            Ok(sent) => sent,
            Err(failure) => {
                tracing::error!(
                    "Failed to send reply to lead_id={} for sid={}: {}",
                    lead.id,
                    inbound.message_sid,
                    failure
                );
                return Ok(PipelineOutcome::Partial {
                    lead_id: lead.id,
                    reason: failure.to_string(),
                });
            }
        };

        // PERSISTED
        let outbound = NewConversationMessage {
            lead_id: lead.id,
            message_sid: sent.sid.clone(),
            direction: Direction::Outbound,
            message: reply,
            status: sent.delivery_status(),
            from: inbound.to.clone(),
            to: inbound.from.clone(),
        };
        match self.store.append(outbound).await {
            Ok(msg) => {
                tracing::info!(
                    "Reply persisted: lead_id={} reply_sid={} id={}",
                    lead.id,
                    sent.sid,
                    msg.id
                );
                Ok(PipelineOutcome::Persisted {
                    lead_id: lead.id,
                    reply_sid: sent.sid,
                })
            }
            Err(e) => {
                tracing::error!(
                    "Failed to store outbound message sid={} for lead_id={}: {}",
                    sent.sid,
                    lead.id,
                    e
                );
                Ok(PipelineOutcome::Partial {
                    lead_id: lead.id,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Applies a delivery-status callback. Returns whether a message changed.
    pub async fn handle_status(&self, payload: StatusCallbackPayload) -> Result<bool, AppError> {
        tracing::info!(
            "Message status update: sid={:?} status={:?} to={:?} from={:?} error_code={:?} error_message={:?}",
            payload.message_sid,
            payload.message_status,
            payload.to,
            payload.from,
            payload.error_code,
            payload.error_message
        );

        let Some(sid) = payload.message_sid.filter(|s| !s.trim().is_empty()) else {
            tracing::warn!("Status callback without MessageSid");
            return Ok(false);
        };
        let raw_status = payload.message_status.unwrap_or_default();
        let Some(status) = DeliveryStatus::from_provider(&raw_status) else {
            tracing::warn!("Ignoring unknown message status '{}' for sid={}", raw_status, sid);
            return Ok(false);
        };

        let updated = self
            .store
            .update_status(sid.trim(), status, Utc::now())
            .await
            .map_err(AppError::from)
            .context("Updating message status")?;
        if !updated {
            tracing::debug!("Status {} for sid={} changed nothing", status, sid);
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_validation() {
        let ok = InboundMessage::from_payload(InboundMessagePayload {
            message_sid: Some(" SM1 ".into()),
            from: Some("whatsapp:+919876543210".into()),
            to: None,
            body: None,
            num_media: None,
        })
        .unwrap();
        assert_eq!(ok.message_sid, "SM1");
        assert_eq!(ok.body, "");
        assert_eq!(ok.to, "");

        let missing_from = InboundMessage::from_payload(InboundMessagePayload {
            message_sid: Some("SM1".into()),
            from: Some("  ".into()),
            ..Default::default()
        });
        assert_eq!(missing_from.unwrap_err(), "missing From");

        let missing_sid = InboundMessage::from_payload(InboundMessagePayload::default());
        assert_eq!(missing_sid.unwrap_err(), "missing MessageSid");
    }

    #[test]
    fn test_outcome_acknowledgement() {
        assert!(PipelineOutcome::Dropped.acknowledged());
        assert!(PipelineOutcome::Partial {
            lead_id: 1,
            reason: "x".into()
        }
        .acknowledged());
        assert!(!PipelineOutcome::Rejected { reason: "x".into() }.acknowledged());
        assert_eq!(PipelineOutcome::Duplicate { lead_id: 1 }.label(), "DUPLICATE");
    }
}
