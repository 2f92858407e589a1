//! On-demand lead-quality scoring of a conversation transcript.
use crate::llm_client::ChatModel;
use crate::models::{AnalysisResult, ChatRequest, ChatTurn, ConversationMessage, Direction};
use serde_json::Value;
use std::sync::Arc;

pub const ANALYSIS_TEMPERATURE: f32 = 0.3;
pub const ANALYSIS_MAX_TOKENS: u32 = 500;

const NO_SUMMARY: &str = "No summary available";
const NO_REASONING: &str = "No reasoning provided";

/// Renders a conversation as `User: …` / `Assistant: …` lines, oldest first.
pub fn format_transcript(messages: &[ConversationMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let speaker = match m.direction {
                Direction::Inbound => "User",
                Direction::Outbound => "Assistant",
            };
            format!("{}: {}", speaker, m.message)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn scoring_prompt(transcript: &str) -> String {
    format!(
        r#"You are an expert conversation analyst for a loan advisory service.
Analyze the following conversation transcript and provide a JSON-formatted
assessment focusing on lead quality and potential:

Conversation:
{transcript}

Please provide a JSON response with the following structure:
{{
    "score": number (1-10),
    "summary": "Brief conversation summary",
    "reasoning": "Detailed analysis explaining the score"
}}

Scoring Criteria:
- Lead Interest (0-4 points)
- Conversation Depth (0-3 points)
- Potential for Conversion (0-3 points)

Focus on:
- Clarity of loan requirements
- User's engagement level
- Potential for scheduling a consultation"#
    )
}

/// Drops a surrounding Markdown code fence, if any.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_score(value: Option<&Value>) -> u8 {
    let score = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match score {
        Some(s) if s.is_finite() => s
            .round()
            .clamp(AnalysisResult::MIN_SCORE as f64, AnalysisResult::MAX_SCORE as f64)
            as u8,
        _ => AnalysisResult::MIN_SCORE,
    }
}

/// Renders one reasoning entry; strings stay unquoted, `null` is skipped.
fn reasoning_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

fn flatten_reasoning(value: Option<&Value>) -> String {
    let text = match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(key, v)| reasoning_value(v).map(|s| format!("{}: {}", key, s)))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, v)| reasoning_value(v).map(|s| format!("{}: {}", i, s)))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => reasoning_value(other).unwrap_or_default(),
        None => String::new(),
    };

    let text = text.trim();
    if text.is_empty() {
        NO_REASONING.to_string()
    } else {
        text.to_string()
    }
}

/// Parses the model's JSON answer into an `AnalysisResult`.
pub fn parse_analysis(content: &str) -> Result<AnalysisResult, String> {
    let value: Value = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| format!("Invalid JSON format: {}", e))?;
    let Value::Object(ref map) = value else {
        return Err("Invalid JSON format: expected an object".to_string());
    };

    let summary = map
        .get("summary")
        .and_then(|s| s.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_SUMMARY)
        .to_string();

    Ok(AnalysisResult {
        score: parse_score(map.get("score")),
        summary,
        reasoning: flatten_reasoning(map.get("reasoning")),
    })
}

#[derive(Clone)]
pub struct ConversationAnalyzer {
    model: Arc<dyn ChatModel>,
    model_id: String,
}

impl ConversationAnalyzer {
    pub fn new(model: Arc<dyn ChatModel>, model_id: impl Into<String>) -> Self {
        Self {
            model,
            model_id: model_id.into(),
        }
    }

    /// Scores `transcript`. Any failure yields the sentinel result.
    pub async fn analyze(&self, transcript: &str) -> AnalysisResult {
        tracing::debug!(
            "Starting conversation analysis: transcript_len={}",
            transcript.len()
        );

        let request = ChatRequest {
            model: self.model_id.clone(),
            messages: vec![ChatTurn::user(scoring_prompt(transcript))],
            temperature: ANALYSIS_TEMPERATURE,
            max_tokens: ANALYSIS_MAX_TOKENS,
        };

        let content = match self.model.complete(&request).await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!("Analysis failed: {}", e);
                return AnalysisResult::failed(e);
            }
        };

        match parse_analysis(&content) {
            Ok(result) => {
                tracing::info!(
                    "Analysis completed: score={}, summary_len={}",
                    result.score,
                    result.summary.len()
                );
                result
            }
            Err(cause) => {
                tracing::error!("Failed to parse analysis result: {} (content: {})", cause, content);
                AnalysisResult::failed(cause)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::ModelError;
    use crate::models::DeliveryStatus;
    use async_trait::async_trait;
    use chrono::Utc;

    struct FixedModel(Result<String, ModelError>);

    #[async_trait]
    impl ChatModel for FixedModel {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, ModelError> {
            self.0.clone()
        }
    }

    fn analyzer(reply: Result<String, ModelError>) -> ConversationAnalyzer {
        ConversationAnalyzer::new(Arc::new(FixedModel(reply)), "test-model")
    }

    #[test]
    fn test_parse_plain_result() {
        let result =
            parse_analysis(r#"{"score": 8, "summary": "Keen buyer", "reasoning": "Asked for a call"}"#)
                .unwrap();
        assert_eq!(result.score, 8);
        assert_eq!(result.summary, "Keen buyer");
        assert_eq!(result.reasoning, "Asked for a call");
    }

    #[test]
    fn test_parse_nested_reasoning_is_flattened() {
        let result = parse_analysis(
            r#"{"score": 6, "summary": "s", "reasoning": {"interest": "high", "depth": "shallow", "points": 3}}"#,
        )
        .unwrap();
        assert_eq!(
            result.reasoning,
            "interest: high\ndepth: shallow\npoints: 3"
        );
    }

    #[test]
    fn test_parse_numeric_sub_scores_keep_model_order() {
        let result = parse_analysis(
            r#"{"score": 7, "summary": "s", "reasoning": {"zeta": 3, "alpha": {"level": "high"}, "skip": null}}"#,
        )
        .unwrap();
        assert_eq!(result.reasoning, "zeta: 3\nalpha: {\"level\":\"high\"}");
    }

    #[test]
    fn test_parse_reasoning_array() {
        let result = parse_analysis(
            r#"{"score": 6, "summary": "s", "reasoning": ["Asked about rates", "Wants a call"]}"#,
        )
        .unwrap();
        assert_eq!(result.reasoning, "0: Asked about rates\n1: Wants a call");
    }

    #[test]
    fn test_parse_defaults_and_clamping() {
        let result = parse_analysis(r#"{"reasoning": ""}"#).unwrap();
        assert_eq!(result.score, 1);
        assert_eq!(result.summary, "No summary available");
        assert_eq!(result.reasoning, "No reasoning provided");

        assert_eq!(parse_analysis(r#"{"score": 42}"#).unwrap().score, 10);
        assert_eq!(parse_analysis(r#"{"score": "7"}"#).unwrap().score, 7);
        assert_eq!(parse_analysis(r#"{"score": 0}"#).unwrap().score, 1);
    }

    #[test]
    fn test_parse_code_fenced_json() {
        let result = parse_analysis("```json\n{\"score\": 5, \"summary\": \"ok\"}\n```").unwrap();
        assert_eq!(result.score, 5);
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_analysis("The lead seems interested, 7/10").is_err());
        assert!(parse_analysis("[1, 2]").is_err());
    }

    #[tokio::test]
    async fn test_analyze_malformed_output_yields_sentinel() {
        let result = analyzer(Ok("not json at all".to_string())).analyze("User: hi").await;
        assert_eq!(result.score, 1);
        assert_eq!(result.summary, "Error analyzing conversation");
        assert!(result.reasoning.starts_with("Analysis failed: "));
    }

    #[tokio::test]
    async fn test_analyze_model_failure_yields_sentinel() {
        let result = analyzer(Err(ModelError::Connectivity("refused".into())))
            .analyze("User: hi")
            .await;
        assert_eq!(result.score, 1);
        assert_eq!(result.summary, "Error analyzing conversation");
        assert!(result.reasoning.contains("refused"));
    }

    #[test]
    fn test_format_transcript() {
        let msg = |direction, text: &str| ConversationMessage {
            id: 1,
            lead_id: 1,
            message_sid: "SM".into(),
            direction,
            message: text.into(),
            status: DeliveryStatus::Sent,
            from: String::new(),
            to: String::new(),
            delivered_at: None,
            read_at: None,
            created_at: Utc::now(),
        };
        let transcript = format_transcript(&[
            msg(Direction::Inbound, "Hi"),
            msg(Direction::Outbound, "Hello! Personal or business loan?"),
        ]);
        assert_eq!(transcript, "User: Hi\nAssistant: Hello! Personal or business loan?");
    }
}
