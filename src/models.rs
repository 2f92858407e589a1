use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

// ============ Lead Models ============

/// Attribute labels that may hold a lead's phone number.
///
/// Compared against the trimmed, lowercased `field_name` of each attribute.
pub const PHONE_LABELS: &[&str] = &[
    "phone",
    "phone number",
    "phone_number",
    "mobile",
    "mobile number",
    "mobile_number",
    "whatsapp",
    "whatsapp number",
    "whatsapp_number",
    "contact",
    "contact number",
    "contact_number",
    "cell",
    "cellphone",
    "telephone",
];

/// Returns true when `field_name` is one of the recognized phone labels.
pub fn is_phone_label(field_name: &str) -> bool {
    let label = field_name.trim().to_lowercase();
    PHONE_LABELS.contains(&label.as_str())
}

/// One free-form `(field_name, field_value)` pair captured at campaign intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadAttribute {
    pub field_name: String,
    #[serde(default)]
    pub field_value: String,
}

impl LeadAttribute {
    pub fn new(field_name: impl Into<String>, field_value: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            field_value: field_value.into(),
        }
    }
}

/// A prospective customer. The attribute schema varies per campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    pub attributes: Vec<LeadAttribute>,
}

impl Lead {
    /// Attributes whose label marks them as phone numbers, in stored order.
    pub fn phone_attributes(&self) -> impl Iterator<Item = &LeadAttribute> {
        self.attributes
            .iter()
            .filter(|a| is_phone_label(&a.field_name) && !a.field_value.trim().is_empty())
    }

    /// Best phone number for outbound contact.
    ///
    /// Preference: `phone`, then `mobile`, then `whatsapp`, then any other phone label.
    pub fn preferred_phone(&self) -> Option<&str> {
        for preferred in ["phone", "mobile", "whatsapp"] {
            if let Some(attr) = self
                .phone_attributes()
                .find(|a| a.field_name.trim().eq_ignore_ascii_case(preferred))
            {
                return Some(attr.field_value.trim());
            }
        }
        self.phone_attributes().next().map(|a| a.field_value.trim())
    }
}

// ============ Conversation Models ============

/// Direction of a message relative to this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            other => Err(format!("unknown message direction '{}'", other)),
        }
    }
}

/// Delivery state of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Received,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Received => "received",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    /// Maps the provider's status vocabulary onto ours.
    ///
    /// Twilio reports a few transitional states that we fold into `sent`,
    /// and `undelivered` is a failure from our point of view.
    pub fn from_provider(status: &str) -> Option<Self> {
        match status.trim().to_lowercase().as_str() {
            "accepted" | "scheduled" | "queued" | "sending" | "sent" => Some(Self::Sent),
            "received" | "receiving" => Some(Self::Received),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" | "undelivered" | "canceled" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Position in the `sent/received < delivered < read` progression.
    fn rank(&self) -> u8 {
        match self {
            Self::Sent | Self::Received | Self::Failed => 0,
            Self::Delivered => 1,
            Self::Read => 2,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "received" => Ok(Self::Received),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown delivery status '{}'", other)),
        }
    }
}

/// Row as stored in `lead_conversations`.
#[derive(Debug, Clone, FromRow)]
pub struct ConversationRow {
    pub id: i64,
    pub lead_id: i64,
    pub message_sid: String,
    pub direction: String,
    pub message: String,
    pub status: String,
    pub from_address: String,
    pub to_address: String,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A single inbound or outbound message in a lead's conversation log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationMessage {
    pub id: i64,
    pub lead_id: i64,
    pub message_sid: String,
    pub direction: Direction,
    pub message: String,
    pub status: DeliveryStatus,
    pub from: String,
    pub to: String,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn is_from_lead(&self) -> bool {
        self.direction == Direction::Inbound
    }

    /// Applies a status callback without ever moving backwards.
    ///
    /// `delivered_at` and `read_at` are written at most once. A late
    /// `delivered` after `read` only back-fills a missing `delivered_at`.
    /// `failed` is accepted only while the message has not been delivered.
    /// Returns true when any field changed.
    pub fn apply_status(&mut self, status: DeliveryStatus, at: DateTime<Utc>) -> bool {
        let before = (self.status, self.delivered_at, self.read_at);

        match status {
            DeliveryStatus::Delivered => {
                if self.delivered_at.is_none() {
                    self.delivered_at = Some(at);
                }
            }
            DeliveryStatus::Read => {
                if self.read_at.is_none() {
                    self.read_at = Some(at);
                }
            }
            _ => {}
        }

        let advances = match status {
            DeliveryStatus::Failed => self.status.rank() == 0,
            _ => status.rank() > self.status.rank(),
        };
        if advances {
            self.status = status;
        }

        before != (self.status, self.delivered_at, self.read_at)
    }
}

impl TryFrom<ConversationRow> for ConversationMessage {
    type Error = String;

    fn try_from(row: ConversationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            lead_id: row.lead_id,
            message_sid: row.message_sid,
            direction: row.direction.parse()?,
            message: row.message,
            status: row.status.parse()?,
            from: row.from_address,
            to: row.to_address,
            delivered_at: row.delivered_at,
            read_at: row.read_at,
            created_at: row.created_at,
        })
    }
}

/// Everything needed to append a message; ids and timestamps come from the store.
#[derive(Debug, Clone)]
pub struct NewConversationMessage {
    pub lead_id: i64,
    pub message_sid: String,
    pub direction: Direction,
    pub message: String,
    pub status: DeliveryStatus,
    pub from: String,
    pub to: String,
}

/// API view of a message, with the derived `is_from_lead` flag.
#[derive(Debug, Serialize)]
pub struct ConversationView {
    pub id: i64,
    pub message_sid: String,
    pub direction: Direction,
    pub message: String,
    pub status: DeliveryStatus,
    pub from: String,
    pub to: String,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub is_from_lead: bool,
}

impl From<ConversationMessage> for ConversationView {
    fn from(msg: ConversationMessage) -> Self {
        let is_from_lead = msg.is_from_lead();
        Self {
            id: msg.id,
            message_sid: msg.message_sid,
            direction: msg.direction,
            message: msg.message,
            status: msg.status,
            from: msg.from,
            to: msg.to,
            delivered_at: msg.delivered_at,
            read_at: msg.read_at,
            created_at: msg.created_at,
            is_from_lead,
        }
    }
}

// ============ Model (LLM) Types ============

/// Speaker of a chat turn as understood by the text-generation API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ConversationMessage> for ChatTurn {
    fn from(msg: &ConversationMessage) -> Self {
        match msg.direction {
            Direction::Inbound => Self::user(msg.message.clone()),
            Direction::Outbound => Self::assistant(msg.message.clone()),
        }
    }
}

/// Request body for an OpenAI-compatible chat completion.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatTurn>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Quality score of a conversation. Always carries a score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub score: u8,
    pub summary: String,
    pub reasoning: String,
}

impl AnalysisResult {
    pub const MIN_SCORE: u8 = 1;
    pub const MAX_SCORE: u8 = 10;

    /// Sentinel returned whenever analysis could not be completed.
    pub fn failed(cause: impl fmt::Display) -> Self {
        Self {
            score: Self::MIN_SCORE,
            summary: "Error analyzing conversation".to_string(),
            reasoning: format!("Analysis failed: {}", cause),
        }
    }
}
