use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use super::{title_or_default, ConversationStore};
use crate::errors::AppError;
use crate::models::{
    sort_by_recent_activity, Conversation, ConversationSummary, Message, MessageRole,
    DEFAULT_CONVERSATION_TITLE,
};

/// On-disk shape of one conversation; the id is the key of the enclosing map.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredConversation {
    title: String,
    #[serde(default)]
    messages: Vec<Message>,
}

type Document = HashMap<String, StoredConversation>;

/// Conversation store backed by a single JSON document.
///
/// Every operation reads the whole document and every mutation rewrites it,
/// all under one lock, so concurrent appends cannot lose each other's writes.
pub struct JsonConversationStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonConversationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn display_path(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> Result<Document, AppError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Document::new()),
            Err(e) => {
                error!("Failed to read conversation store {}: {e}", self.display_path());
                return Err(AppError::storage_io(self.display_path(), e));
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Document::new());
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            error!("Conversation store {} is not valid JSON: {e}", self.display_path());
            AppError::StorageFormat { path: self.display_path(), source: e }
        })
    }

    async fn persist(&self, doc: &Document) -> Result<(), AppError> {
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| AppError::StorageFormat { path: self.display_path(), source: e })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::storage_io(parent.display().to_string(), e))?;
        }

        // Write-then-rename keeps the previous document intact if the write fails.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| {
            error!("Failed to write conversation store {}: {e}", tmp.display());
            AppError::storage_io(tmp.display().to_string(), e)
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            error!("Failed to replace conversation store {}: {e}", self.display_path());
            AppError::storage_io(self.display_path(), e)
        })
    }
}

#[async_trait]
impl ConversationStore for JsonConversationStore {
    async fn create(&self, title: Option<String>) -> Result<String, AppError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;

        let id = Uuid::new_v4().to_string();
        doc.insert(
            id.clone(),
            StoredConversation { title: title_or_default(title), messages: Vec::new() },
        );
        self.persist(&doc).await?;

        debug!(conversation_id = %id, "Conversation created");
        Ok(id)
    }

    async fn append(&self, id: &str, role: MessageRole, text: &str) -> Result<Message, AppError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;

        let message = Message::new(role, text);
        doc.entry(id.to_string())
            .or_insert_with(|| {
                debug!(conversation_id = %id, "Appending to unknown conversation, recreating it");
                StoredConversation {
                    title: DEFAULT_CONVERSATION_TITLE.to_string(),
                    messages: Vec::new(),
                }
            })
            .messages
            .push(message.clone());
        self.persist(&doc).await?;

        Ok(message)
    }

    async fn get(&self, id: &str) -> Result<Conversation, AppError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;

        let stored = doc
            .remove(id)
            .ok_or_else(|| AppError::ConversationNotFound { id: id.to_string() })?;
        Ok(Conversation { id: id.to_string(), title: stored.title, messages: stored.messages })
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, AppError> {
        let _guard = self.lock.lock().await;
        let doc = self.load().await?;

        let mut summaries: Vec<ConversationSummary> = doc
            .into_iter()
            .map(|(id, stored)| {
                Conversation { id, title: stored.title, messages: stored.messages }.summary()
            })
            .collect();
        sort_by_recent_activity(&mut summaries);
        Ok(summaries)
    }
}
