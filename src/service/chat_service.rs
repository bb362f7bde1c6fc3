use std::sync::Arc;

use futures_util::Stream;
use tracing::info;
use uuid::Uuid;

use crate::agent::GenerationEngine;
use crate::db::ConversationStore;
use crate::errors::AppError;
use crate::filter::{Classification, ContentFilter, REFUSAL_TEXT};
use crate::models::{
    Conversation, ConversationSummary, Message, MessageRole, SendRequest, StreamEvent,
};
use crate::stream::{relay_events, RelayConfig, SessionConfig, SessionRegistry, StreamSession};

const MAX_MESSAGE_LENGTH: usize = 8000;
const MAX_TITLE_CHARS: usize = 60;
pub const EMPTY_ASK_REPLY: &str = "Inserisci un messaggio valido.";

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn ConversationStore>,
    engine: Arc<dyn GenerationEngine>,
    filter: Arc<ContentFilter>,
    registry: Arc<SessionRegistry>,
    session_config: Arc<SessionConfig>,
    relay_config: RelayConfig,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        engine: Arc<dyn GenerationEngine>,
        registry: Arc<SessionRegistry>,
        session_config: SessionConfig,
        relay_config: RelayConfig,
    ) -> Self {
        Self {
            store,
            engine,
            filter: Arc::new(ContentFilter::default()),
            registry,
            session_config: Arc::new(session_config),
            relay_config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub async fn get_conversations(&self) -> Result<Vec<ConversationSummary>, AppError> {
        self.store.list().await
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Conversation, AppError> {
        self.store.get(id).await
    }

    pub async fn create_conversation(&self, title: Option<String>) -> Result<String, AppError> {
        self.store.create(title).await
    }

    /// Records a user message, creating the conversation when no id is given.
    pub async fn send(&self, request: SendRequest) -> Result<String, AppError> {
        // ── Validation ────────────────────────────────────────────────────────
        let message = request.message.trim();
        if message.is_empty() {
            return Err(AppError::EmptyField { field_name: "message".to_string() });
        }
        let length = message.chars().count();
        if length > MAX_MESSAGE_LENGTH {
            return Err(AppError::FieldTooLong {
                field_name: "message".to_string(),
                max_length: MAX_MESSAGE_LENGTH,
                actual_length: length,
            });
        }

        // ── Resolve or create conversation ────────────────────────────────────
        let conversation_id = match non_blank(request.conv_id) {
            Some(id) => id,
            None => self.store.create(Some(title_from(message))).await?,
        };

        self.store.append(&conversation_id, MessageRole::User, message).await?;
        info!(conversation_id = %conversation_id, "User message recorded");
        Ok(conversation_id)
    }

    /// Launches (or relaunches) generation for a conversation and returns
    /// without waiting for it. Without an id a fresh one is allocated but
    /// nothing is stored; its stream reports the missing conversation.
    pub async fn start_stream(&self, conv_id: Option<String>) -> Result<String, AppError> {
        let conversation_id = non_blank(conv_id).unwrap_or_else(|| Uuid::new_v4().to_string());

        let store = Arc::clone(&self.store);
        let engine = Arc::clone(&self.engine);
        let filter = Arc::clone(&self.filter);
        let config = Arc::clone(&self.session_config);
        let id = conversation_id.clone();
        self.registry.start_session(&conversation_id, move |publisher, cancel| {
            StreamSession::new(id, store, engine, filter, config, cancel).run(publisher)
        });

        Ok(conversation_id)
    }

    pub fn stop_stream(&self, conversation_id: &str) -> bool {
        self.registry.cancel(conversation_id)
    }

    pub fn events(&self, conversation_id: String) -> impl Stream<Item = StreamEvent> + Send + 'static {
        relay_events(Arc::clone(&self.registry), conversation_id, self.relay_config)
    }

    /// One-shot, non-streaming answer to a single message; nothing is stored.
    pub async fn ask(&self, message: &str) -> Result<String, AppError> {
        let message = message.trim();
        if message.is_empty() {
            return Ok(EMPTY_ASK_REPLY.to_string());
        }
        info!(chars = message.chars().count(), "One-shot question received");

        if self.filter.classify(message) == Classification::OutOfDomain {
            return Ok(REFUSAL_TEXT.to_string());
        }
        let prompt = self.session_config.template.render(
            &self.session_config.system_prompt,
            &[Message::new(MessageRole::User, message)],
        );
        let reply = self.engine.generate(&prompt).await?;
        info!(chars = reply.chars().count(), "One-shot answer generated");
        Ok(reply)
    }
}

fn non_blank(id: Option<String>) -> Option<String> {
    id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn title_from(message: &str) -> String {
    if message.chars().count() > MAX_TITLE_CHARS {
        format!("{}…", message.chars().take(MAX_TITLE_CHARS).collect::<String>())
    } else {
        message.to_string()
    }
}
