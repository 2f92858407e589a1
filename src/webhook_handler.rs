use crate::handlers::AppState;
use crate::orchestrator::PipelineOutcome;
use crate::webhook_models::{InboundMessagePayload, StatusCallbackPayload, WebhookResponse};
use axum::{extract::State, http::StatusCode, Form, Json};
use std::sync::Arc;

/// Twilio inbound WhatsApp webhook
///
/// Runs the message through the reply pipeline. Twilio only retries on
/// non-2xx, so every handled outcome (including "no lead" and duplicate
/// deliveries) is acknowledged with 200. Only infrastructure failures
/// before the reply is generated answer 500.
///
/// Expected payload: form-encoded `MessageSid`, `From`, `To`, `Body`
pub async fn incoming_message(
    State(state): State<Arc<AppState>>,
    Form(payload): Form<InboundMessagePayload>,
) -> (StatusCode, Json<WebhookResponse>) {
    tracing::info!("Received Twilio incoming-message webhook");
    tracing::debug!("Incoming payload: {:?}", payload);

    match state.orchestrator.handle_inbound(payload).await {
        Ok(outcome) => {
            tracing::info!("Inbound message finished as {}", outcome.label());
            if let PipelineOutcome::Partial { lead_id, ref reason } = outcome {
                tracing::warn!("Reply for lead_id={} not completed: {}", lead_id, reason);
            }

            let body = if outcome.acknowledged() {
                WebhookResponse::ok()
            } else {
                WebhookResponse::not_processed()
            };
            (StatusCode::OK, Json(body))
        }
        Err(e) => {
            tracing::error!("Error processing incoming message: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookResponse::failed(e.to_string())),
            )
        }
    }
}

/// Twilio delivery-status callback
///
/// Always acknowledged; a failed update is logged and left for the next
/// callback to fix.
pub async fn message_status(
    State(state): State<Arc<AppState>>,
    Form(payload): Form<StatusCallbackPayload>,
) -> (StatusCode, Json<WebhookResponse>) {
    if let Err(e) = state.orchestrator.handle_status(payload).await {
        tracing::error!("Error processing status update: {}", e);
    }

    (StatusCode::OK, Json(WebhookResponse::ok()))
}
