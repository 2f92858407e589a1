use crate::models::ChatRequest;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Why a completion could not be obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// The request never completed: connect failure, timeout, or non-2xx status.
    Connectivity(String),
    /// The provider answered but the body was not a usable completion.
    InvalidResponse(String),
    /// The circuit breaker is open and the call was not attempted.
    Unavailable,
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Connectivity(msg) => write!(f, "Model connectivity error: {}", msg),
            ModelError::InvalidResponse(msg) => write!(f, "Invalid model response: {}", msg),
            ModelError::Unavailable => write!(f, "Model temporarily unavailable"),
        }
    }
}

impl std::error::Error for ModelError {}

/// A text-generation backend that completes a chat.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ModelError>;
}

/// Pulls `choices[0].message.content` out of a chat completion body.
pub fn extract_completion(body: &Value) -> Result<String, ModelError> {
    let choices = body
        .get("choices")
        .and_then(|c| c.as_array())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ModelError::InvalidResponse("missing 'choices' field".to_string()))?;

    choices[0]
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ModelError::InvalidResponse("missing message content".to_string()))
}

/// Client for OpenAI-compatible `/chat/completions` endpoints (OpenRouter, Groq).
#[derive(Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    extra_headers: Vec<(String, String)>,
    provider: &'static str,
}

impl OpenAiCompatClient {
    /// Creates a new client.
    ///
    /// # Arguments
    ///
    /// * `provider` - Name used in logs.
    /// * `base_url` - API root, e.g. `https://openrouter.ai/api/v1`.
    /// * `api_key` - Bearer token.
    /// * `timeout` - Upper bound for a whole request.
    pub fn new(
        provider: &'static str,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, crate::errors::AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                crate::errors::AppError::ExternalApiError(format!(
                    "Failed to create {} client: {}",
                    provider, e
                ))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            extra_headers: Vec::new(),
            provider,
        })
    }

    /// Adds a header sent with every request (OpenRouter attribution headers).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(
            "Calling {} model {} with {} message(s)",
            self.provider,
            request.model,
            request.messages.len()
        );

        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request);
        for (name, value) in &self.extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!("{} HTTP error: {}", self.provider, e);
            ModelError::Connectivity(e.to_string())
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("{} returned {}: {}", self.provider, status, error_text);
            return Err(ModelError::Connectivity(format!(
                "{} returned {}",
                self.provider, status
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            ModelError::InvalidResponse(format!("Failed to parse {} response: {}", self.provider, e))
        })?;
        tracing::debug!("{} response: {}", self.provider, body);

        extract_completion(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_completion() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "Hi there"}}]});
        assert_eq!(extract_completion(&body).unwrap(), "Hi there");
    }

    #[test]
    fn test_extract_completion_missing_choices() {
        assert!(matches!(
            extract_completion(&json!({"error": "nope"})),
            Err(ModelError::InvalidResponse(_))
        ));
        assert!(matches!(
            extract_completion(&json!({"choices": []})),
            Err(ModelError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_client_creation() {
        let client = OpenAiCompatClient::new(
            "openrouter",
            "https://example.com/api/v1/",
            "key",
            Duration::from_secs(5),
        );
        assert!(client.is_ok());
        assert_eq!(client.unwrap().base_url, "https://example.com/api/v1");
    }
}
