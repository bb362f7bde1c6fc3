//! Conversation persistence.
//!
//! Every backend keeps the same contract: appends are atomic per conversation,
//! an append to an unknown id recreates the conversation with the default
//! title, and listings are ordered by most recent activity.

pub mod json_store;
pub mod pg_store;

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::{Conversation, ConversationSummary, Message, MessageRole};

pub use json_store::JsonConversationStore;
pub use pg_store::PgConversationStore;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Allocates a new conversation with no messages and returns its id.
    async fn create(&self, title: Option<String>) -> Result<String, AppError>;

    /// Appends one message stamped with the current time.
    async fn append(&self, id: &str, role: MessageRole, text: &str) -> Result<Message, AppError>;

    async fn get(&self, id: &str) -> Result<Conversation, AppError>;

    async fn list(&self) -> Result<Vec<ConversationSummary>, AppError>;
}

pub(crate) fn title_or_default(title: Option<String>) -> String {
    title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| crate::models::DEFAULT_CONVERSATION_TITLE.to_string())
}
