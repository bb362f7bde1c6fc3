use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONVERSATION_TITLE: &str = "Nuova conversazione";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: String, title: String) -> Self {
        Self { id, title, messages: Vec::new() }
    }

    /// Timestamp of the newest message, or the Unix epoch for an empty conversation.
    pub fn last_ts(&self) -> DateTime<Utc> {
        self.messages.last().map(|m| m.ts).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == MessageRole::User)
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            last_ts: self.last_ts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub last_ts: DateTime<Utc>,
}

/// Most recently active first; ties keep their relative order.
pub fn sort_by_recent_activity(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| b.last_ts.cmp(&a.last_ts));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for MessageRole {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub text: String,
    pub ts: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self { role, text: text.into(), ts: Utc::now() }
    }
}

/// One unit pushed to a stream subscriber.
///
/// Serialized as `{"type": "token", "text": "..."}`, `{"type": "done"}` or
/// `{"type": "error", "text": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Token { text: String },
    Done,
    Error { text: String },
}

impl StreamEvent {
    pub fn token(text: impl Into<String>) -> Self {
        StreamEvent::Token { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        StreamEvent::Error { text: text.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

// ── Request / response bodies ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateConversationResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub conv_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct StartStreamRequest {
    pub conv_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StopStreamRequest {
    pub conv_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationIdResponse {
    pub conv_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopStreamResponse {
    pub conv_id: String,
    pub cancelled: bool,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub response: String,
}
