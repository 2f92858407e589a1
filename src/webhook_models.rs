use serde::{Deserialize, Serialize};

/// Inbound WhatsApp message posted by Twilio (form-encoded).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundMessagePayload {
    #[serde(rename = "MessageSid", default)]
    pub message_sid: Option<String>,

    /// Channel-prefixed sender, e.g. `whatsapp:+919876543210`.
    #[serde(rename = "From", default)]
    pub from: Option<String>,

    /// Our channel-prefixed number.
    #[serde(rename = "To", default)]
    pub to: Option<String>,

    #[serde(rename = "Body", default)]
    pub body: Option<String>,

    #[serde(rename = "NumMedia", default)]
    pub num_media: Option<String>,
}

/// Delivery-status callback posted by Twilio (form-encoded).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusCallbackPayload {
    #[serde(rename = "MessageSid", default)]
    pub message_sid: Option<String>,

    /// Provider vocabulary: queued, sent, delivered, read, failed, undelivered...
    #[serde(rename = "MessageStatus", default)]
    pub message_status: Option<String>,

    #[serde(rename = "To", default)]
    pub to: Option<String>,

    #[serde(rename = "From", default)]
    pub from: Option<String>,

    #[serde(rename = "ErrorCode", default)]
    pub error_code: Option<String>,

    #[serde(rename = "ErrorMessage", default)]
    pub error_message: Option<String>,
}

/// Acknowledgement returned to the provider.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WebhookResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            message: None,
        }
    }

    pub fn not_processed() -> Self {
        Self {
            success: false,
            error: None,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some("Internal server error".to_string()),
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inbound_form() {
        let form = "MessageSid=SM1&From=whatsapp%3A%2B919876543210&To=whatsapp%3A%2B14155238886&Body=Hi&NumMedia=0&AccountSid=AC1";
        let payload: InboundMessagePayload = decode_form(form);
        assert_eq!(payload.message_sid.as_deref(), Some("SM1"));
        assert_eq!(payload.from.as_deref(), Some("whatsapp:+919876543210"));
        assert_eq!(payload.body.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_parse_status_form_with_error() {
        let form = "MessageSid=SM9&MessageStatus=undelivered&ErrorCode=63016&ErrorMessage=Outside+window";
        let payload: StatusCallbackPayload = decode_form(form);
        assert_eq!(payload.message_status.as_deref(), Some("undelivered"));
        assert_eq!(payload.error_code.as_deref(), Some("63016"));
        assert_eq!(payload.error_message.as_deref(), Some("Outside window"));
        assert!(payload.to.is_none());
    }

    #[test]
    fn test_response_shapes() {
        assert_eq!(
            serde_json::to_value(WebhookResponse::ok()).unwrap(),
            serde_json::json!({"success": true})
        );
        assert_eq!(
            serde_json::to_value(WebhookResponse::failed("db down")).unwrap(),
            serde_json::json!({"success": false, "error": "Internal server error", "message": "db down"})
        );
    }

    /// Decodes a form body the same way axum's `Form` extractor does.
    fn decode_form<T: serde::de::DeserializeOwned>(form: &str) -> T {
        use axum::extract::{Form, FromRequest};
        use axum::http::Request;

        let request = Request::builder()
            .method("POST")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(axum::body::Body::from(form.to_string()))
            .unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let Form(value) = runtime
            .block_on(Form::<T>::from_request(request, &()))
            .unwrap();
        value
    }
}
