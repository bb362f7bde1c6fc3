use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::channel::EventPublisher;
use crate::agent::{ChatTemplate, GenerationEngine, DEFAULT_SYSTEM_PROMPT};
use crate::db::ConversationStore;
use crate::errors::AppError;
use crate::filter::{Classification, ContentFilter, REFUSAL_TEXT};
use crate::models::MessageRole;

/// Knobs shared by every session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Characters per `Token` event.
    pub chunk_chars: usize,
    /// Pause between two `Token` events; zero disables pacing.
    pub chunk_delay: Duration,
    pub system_prompt: String,
    pub template: ChatTemplate,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_chars: 12,
            chunk_delay: Duration::from_millis(30),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            template: ChatTemplate::plain(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// Splits `text` into pieces of at most `size` characters.
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size.max(1)).map(|chunk| chunk.iter().collect()).collect()
}

/// One generation for one conversation, published as chunked events.
pub struct StreamSession {
    conversation_id: String,
    store: Arc<dyn ConversationStore>,
    engine: Arc<dyn GenerationEngine>,
    filter: Arc<ContentFilter>,
    config: Arc<SessionConfig>,
    cancel: CancellationToken,
}

impl StreamSession {
    pub fn new(
        conversation_id: impl Into<String>,
        store: Arc<dyn ConversationStore>,
        engine: Arc<dyn GenerationEngine>,
        filter: Arc<ContentFilter>,
        config: Arc<SessionConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self { conversation_id: conversation_id.into(), store, engine, filter, config, cancel }
    }

    pub async fn run(self, publisher: EventPublisher) -> SessionOutcome {
        let id = self.conversation_id.as_str();
        info!(conversation_id = %id, "Stream session started");

        let text = match self.produce().await {
            Ok(Some(text)) => text,
            Ok(None) => {
                info!(conversation_id = %id, "Stream session cancelled before output was ready");
                publisher.done();
                return SessionOutcome::Cancelled;
            }
            Err(e) => {
                if e.is_engine_failure() {
                    warn!(conversation_id = %id, "Generation failed: {e}");
                } else {
                    error!(conversation_id = %id, "Stream session failed: {e}");
                }
                publisher.fail(e.to_string());
                return SessionOutcome::Failed;
            }
        };

        for chunk in chunk_text(&text, self.config.chunk_chars) {
            if self.cancel.is_cancelled() {
                info!(conversation_id = %id, "Stream session cancelled during emission");
                publisher.done();
                return SessionOutcome::Cancelled;
            }
            publisher.token(chunk);
            if !self.config.chunk_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.chunk_delay) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }

        publisher.done();
        debug!(conversation_id = %id, chars = text.chars().count(), "Stream session completed");
        SessionOutcome::Completed
    }

    /// Produces the reply and records it, or `None` when cancelled first.
    async fn produce(&self) -> Result<Option<String>, AppError> {
        let id = self.conversation_id.as_str();
        let conversation = self.store.get(id).await?;
        let last_user = conversation
            .last_user_message()
            .ok_or_else(|| AppError::EmptyField { field_name: "message".to_string() })?;

        let text = match self.filter.classify(&last_user.text) {
            Classification::OutOfDomain => {
                debug!(conversation_id = %id, "Out-of-domain request, sending refusal");
                REFUSAL_TEXT.to_string()
            }
            Classification::InDomain => {
                let prompt = self
                    .config
                    .template
                    .render(&self.config.system_prompt, &conversation.messages);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(None),
                    reply = self.engine.generate(&prompt) => reply?,
                }
            }
        };

        if self.cancel.is_cancelled() {
            return Ok(None);
        }
        // Recorded before any chunk goes out, so history is complete even if
        // the subscriber disconnects mid-stream.
        self.store.append(id, MessageRole::Assistant, &text).await?;
        Ok(Some(text))
    }
}
