use crate::analyzer::{format_transcript, ConversationAnalyzer};
use crate::conversation_store::ConversationStore;
use crate::errors::{AppError, ResultExt};
use crate::gateway_client::MessageGateway;
use crate::lead_resolver::LeadStore;
use crate::models::{ConversationView, Direction, Lead, NewConversationMessage};
use crate::orchestrator::WebhookOrchestrator;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Opening line sent when a lead first enters a campaign.
pub const WELCOME_MESSAGE: &str =
    "Hello! 😊 I'm Sarah from LoanWise. Are you interested in a Personal Loan or Business Loan?";

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Inbound pipeline behind the Twilio webhooks.
    pub orchestrator: WebhookOrchestrator,
    /// Lead-quality scoring for the admin API.
    pub analyzer: ConversationAnalyzer,
    pub conversations: Arc<dyn ConversationStore>,
    pub leads: Arc<dyn LeadStore>,
    /// Outbound WhatsApp sender used for staff-initiated messages.
    pub gateway: Arc<dyn MessageGateway>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct WelcomeRequest {
    #[serde(default)]
    pub campaign_name: Option<String>,
}

/// Health check endpoint.
///
/// Returns the service status and version.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lead-conversation-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

async fn require_lead(state: &AppState, lead_id: i64) -> Result<Lead, AppError> {
    state
        .leads
        .find_by_id(lead_id)
        .await
        .context("Loading lead")?
        .ok_or_else(|| AppError::NotFound(format!("Lead with id {} not found", lead_id)))
}

/// GET /api/v1/leads/:id/conversations
///
/// Full conversation log for a lead, oldest first.
pub async fn get_conversations(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!("GET /leads/{}/conversations", lead_id);

    require_lead(&state, lead_id).await?;
    let messages = state
        .conversations
        .history(lead_id)
        .await
        .map_err(AppError::from)
        .context("Loading conversation history")?;
    let conversations: Vec<ConversationView> =
        messages.into_iter().map(ConversationView::from).collect();

    Ok(Json(json!({
        "lead_id": lead_id,
        "conversations": conversations,
    })))
}

/// GET /api/v1/leads/:id/conversation-analysis
///
/// Scores the whole conversation with the analysis model. A lead without
/// messages has nothing to score and answers 404.
pub async fn get_conversation_analysis(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!("GET /leads/{}/conversation-analysis", lead_id);

    require_lead(&state, lead_id).await?;
    let messages = state
        .conversations
        .history(lead_id)
        .await
        .map_err(AppError::from)
        .context("Loading conversation history")?;
    if messages.is_empty() {
        return Err(AppError::NotFound(format!(
            "No conversation found for lead {}",
            lead_id
        )));
    }

    let result = state.analyzer.analyze(&format_transcript(&messages)).await;
    tracing::info!(
        "Conversation analysis for lead_id={}: score={}",
        lead_id,
        result.score
    );

    Ok(Json(json!({
        "success": true,
        "conversation_score": result.score,
        "analysis": format!("{}\n\n{}", result.summary, result.reasoning),
    })))
}

/// Sends `body` to the lead's preferred phone and records it.
///
/// Nothing is stored unless the provider accepted the message.
async fn send_to_lead(
    state: &AppState,
    lead: &Lead,
    body: &str,
) -> Result<ConversationView, AppError> {
    let phone = lead.preferred_phone().ok_or_else(|| {
        AppError::BadRequest(format!("Lead {} has no phone number", lead.id))
    })?;

    let sent = state.gateway.send(phone, body).await.map_err(|e| {
        tracing::error!("Failed to send message to lead_id={}: {}", lead.id, e);
        AppError::from(e)
    })?;

    let stored = state
        .conversations
        .append(NewConversationMessage {
            lead_id: lead.id,
            message_sid: sent.sid.clone(),
            direction: Direction::Outbound,
            message: body.to_string(),
            status: sent.delivery_status(),
            from: sent.from.clone(),
            to: sent.to.clone(),
        })
        .await
        .map_err(AppError::from)
        .with_context(|| format!("Recording sent message {}", sent.sid))?;

    tracing::info!(
        "Message sent to lead_id={} sid={} id={}",
        lead.id,
        sent.sid,
        stored.id
    );
    Ok(ConversationView::from(stored))
}

/// POST /api/v1/leads/:id/conversations
///
/// Staff-initiated WhatsApp message to a lead.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<i64>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    tracing::info!("POST /leads/{}/conversations", lead_id);

    let message = payload.message.trim();
    if message.is_empty() {
        return Err(AppError::BadRequest("Message cannot be empty".to_string()));
    }

    let lead = require_lead(&state, lead_id).await?;
    let conversation = send_to_lead(&state, &lead, message).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "conversation": conversation,
        })),
    ))
}

/// POST /api/v1/leads/:id/welcome
///
/// Sends the campaign opening line to a newly imported lead.
pub async fn send_welcome_message(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<i64>,
    Json(payload): Json<WelcomeRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    tracing::info!(
        "POST /leads/{}/welcome campaign={:?}",
        lead_id,
        payload.campaign_name
    );

    let lead = require_lead(&state, lead_id).await?;
    let conversation = send_to_lead(&state, &lead, WELCOME_MESSAGE).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "conversation": conversation,
        })),
    ))
}
