//! Contextual WhatsApp replies from an external text-generation model.
//!
//! The generator always produces text. Model failures turn into one of two
//! canned apologies so the webhook can still answer the lead.
use crate::circuit_breaker::{create_model_circuit_breaker, ModelCircuitBreaker};
use crate::llm_client::{ChatModel, ModelError};
use crate::models::{ChatRequest, ChatTurn};
use failsafe::futures::CircuitBreaker;
use std::sync::Arc;

/// Prior turns sent with each request. Older history is dropped.
pub const HISTORY_WINDOW: usize = 5;

pub const REPLY_TEMPERATURE: f32 = 0.3;
pub const REPLY_MAX_TOKENS: u32 = 200;

pub const CLARIFYING_REPLY: &str =
    "I'm not sure what you're asking. Could you please provide more details?";
pub const GENERIC_FAILURE_REPLY: &str =
    "I'm sorry, I'm having trouble processing your request right now. Please try again later.";
pub const CONNECTIVITY_FAILURE_REPLY: &str =
    "I'm sorry, I'm having trouble connecting to our service. Please try again later.";

pub const SYSTEM_PROMPT: &str = r#"You are Sarah, a knowledgeable and empathetic human-like loan advisor. Your role is to assist website visitors with their loan inquiries and guide them towards scheduling a meeting with our expert loan advisors.

Key Responsibilities:
1. Initial Contact
   - Greet users warmly and professionally (only once).
   - Verify their interest in loan services and dig deeper into their needs.
   - Maintain a friendly, approachable and conversational tone.

2. Loan Assessment
   - Inquire about loan purpose (personal/business).
   - Ask about desired loan amount.
   - Gather basic information about their financial situation.
   - Understand their timeline and urgency.

3. Lead Qualification
   - Ask relevant questions to qualify leads.
   - Keep conversation focused on loan services.
   - Handle objections professionally.
   - Guide interested clients to scheduling a meeting either online or in person.

Communication Guidelines:
- Use warm, professional language.
- Include appropriate emojis for friendliness (😊, 📱, 💼).
- Ask one question at a time.
- Keep responses concise and clear, with follow up questions in a natural manner.

Standard Responses:
1. Initial Message: "Are you looking for a Personal Loan or Business Loan?"
2. Scheduling Request: "I'd be happy to have one of our loan experts call you to discuss this further. Would you like to schedule a quick call? 📱"
3. Scheduling Link: "Perfect! Please use this link to schedule a time that works best for you: https://cal.com/webdaddy/30min 📅"
4. Contact Source Query: "You previously inquired through our website. If you'd prefer not to receive messages from us, simply reply 'STOP'."

Important Rules:
1. Never share specific loan terms or rates.
2. Always direct detailed questions to the consultation call.
3. Maintain GDPR and privacy compliance in the Singapore context.
4. Keep focus on scheduling a consultation.
5. Never use aggressive sales tactics.
6. Messages must not exceed 25 words.

Response Structure:
1. Acknowledge their message.
2. Provide relevant information.
3. Ask ONE specific question.
4. Keep responses under 160 characters when possible.

Remember: Your goal is to qualify leads and schedule consultations while maintaining a helpful, professional manner."#;

/// Builds the exact message list sent to the model.
///
/// System prompt first, then at most `HISTORY_WINDOW` of the latest prior
/// turns (oldest first), then the new user message.
pub fn build_messages(new_message: &str, prior_turns: &[ChatTurn]) -> Vec<ChatTurn> {
    let start = prior_turns.len().saturating_sub(HISTORY_WINDOW);
    let mut messages = Vec::with_capacity(HISTORY_WINDOW + 2);
    messages.push(ChatTurn::system(SYSTEM_PROMPT));
    messages.extend(prior_turns[start..].iter().cloned());
    messages.push(ChatTurn::user(new_message));
    messages
}

/// Canned reply for a failed model call.
pub fn fallback_reply(err: &ModelError) -> &'static str {
    match err {
        ModelError::Connectivity(_) => CONNECTIVITY_FAILURE_REPLY,
        ModelError::InvalidResponse(_) | ModelError::Unavailable => GENERIC_FAILURE_REPLY,
    }
}

#[derive(Clone)]
pub struct ReplyGenerator {
    model: Arc<dyn ChatModel>,
    model_id: String,
    breaker: ModelCircuitBreaker,
}

impl ReplyGenerator {
    pub fn new(model: Arc<dyn ChatModel>, model_id: impl Into<String>) -> Self {
        Self {
            model,
            model_id: model_id.into(),
            breaker: create_model_circuit_breaker(),
        }
    }

    /// Produces a reply to `new_message` given the conversation so far.
    ///
    /// `prior_turns` must be oldest first. Never fails.
    pub async fn generate(&self, new_message: &str, prior_turns: &[ChatTurn]) -> String {
        let new_message = new_message.trim();
        tracing::debug!(
            "Generating reply: message_len={}, history_count={}",
            new_message.len(),
            prior_turns.len()
        );

        if new_message.is_empty() {
            return CLARIFYING_REPLY.to_string();
        }

        let request = ChatRequest {
            model: self.model_id.clone(),
            messages: build_messages(new_message, prior_turns),
            temperature: REPLY_TEMPERATURE,
            max_tokens: REPLY_MAX_TOKENS,
        };

        let outcome = match self.breaker.call(self.model.complete(&request)).await {
            Ok(text) => Ok(text),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => Err(ModelError::Unavailable),
        };

        match outcome {
            Ok(text) if !text.trim().is_empty() => {
                tracing::debug!("Generated reply: {}", text);
                text.trim().to_string()
            }
            Ok(_) => {
                tracing::error!("Model returned an empty reply");
                GENERIC_FAILURE_REPLY.to_string()
            }
            Err(e) => {
                tracing::error!("Error generating reply: {}", e);
                fallback_reply(&e).to_string()
            }
        }
    }
}
