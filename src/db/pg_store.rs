use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{error, info};
use uuid::Uuid;

use super::{title_or_default, ConversationStore};
use crate::errors::AppError;
use crate::models::{
    sort_by_recent_activity, Conversation, ConversationSummary, Message, MessageRole,
    DEFAULT_CONVERSATION_TITLE,
};

/// PostgreSQL-backed store, used when `DATABASE_URL` is configured.
#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: String,
    title: String,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects and applies pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(AppError::DatabaseConnectionFailed)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(AppError::DatabaseMigrationFailed)?;

        info!("Database connection established and migrations applied");
        Ok(Self::new(pool))
    }

    async fn find_messages(&self, conversation_id: &str) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query(
            "SELECT role, content, created_at
             FROM messages
             WHERE conversation_id = $1
             ORDER BY id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch messages for conversation {conversation_id}: {e}");
            AppError::db_query(
                format!("Failed to fetch messages for conversation {conversation_id}"),
                e,
            )
        })?;

        rows.into_iter()
            .map(|row: PgRow| {
                let role_str: String = row.try_get("role")
                    .map_err(|e| AppError::db_query("Failed to read role", e))?;
                let role = MessageRole::try_from(role_str)
                    .map_err(|e| AppError::Unexpected(format!("Unknown message role: {e}")))?;
                Ok(Message {
                    role,
                    text: row.try_get("content")
                        .map_err(|e| AppError::db_query("Failed to read content", e))?,
                    ts: row.try_get("created_at")
                        .map_err(|e| AppError::db_query("Failed to read created_at", e))?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn create(&self, title: Option<String>) -> Result<String, AppError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO conversations (id, title, created_at, updated_at)
             VALUES ($1, $2, $3, $3)",
        )
        .bind(&id)
        .bind(title_or_default(title))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to save conversation {id}: {e}");
            AppError::db_query("Failed to save conversation", e)
        })?;
        Ok(id)
    }

    async fn append(&self, id: &str, role: MessageRole, text: &str) -> Result<Message, AppError> {
        let message = Message::new(role, text);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::db_query("Failed to begin transaction", e))?;

        sqlx::query(
            "INSERT INTO conversations (id, title, created_at, updated_at)
             VALUES ($1, $2, $3, $3)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(DEFAULT_CONVERSATION_TITLE)
        .bind(message.ts)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::db_query(format!("Failed to ensure conversation {id}"), e))?;

        // Row lock serializes concurrent appends to the same conversation.
        sqlx::query("SELECT id FROM conversations WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::db_query(format!("Failed to lock conversation {id}"), e))?;

        sqlx::query(
            "INSERT INTO messages (conversation_id, role, content, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(message.role.as_str())
        .bind(&message.text)
        .bind(message.ts)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to save message for conversation {id}: {e}");
            AppError::db_query("Failed to save message", e)
        })?;

        sqlx::query("UPDATE conversations SET updated_at = $1 WHERE id = $2")
            .bind(message.ts)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::db_query("Failed to update conversation", e))?;

        tx.commit()
            .await
            .map_err(|e| AppError::db_query("Failed to commit message", e))?;
        Ok(message)
    }

    async fn get(&self, id: &str) -> Result<Conversation, AppError> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, title FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to find conversation {id}: {e}");
            AppError::db_query(format!("Failed to find conversation {id}"), e)
        })?
        .ok_or_else(|| AppError::ConversationNotFound { id: id.to_string() })?;

        let messages = self.find_messages(id).await?;
        Ok(Conversation { id: row.id, title: row.title, messages })
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, AppError> {
        let rows = sqlx::query(
            "SELECT c.id, c.title, MAX(m.created_at) AS last_ts
             FROM conversations c
             LEFT JOIN messages m ON m.conversation_id = c.id
             GROUP BY c.id, c.title",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch all conversations: {e}");
            AppError::db_query("Failed to fetch conversations", e)
        })?;

        let mut summaries = rows
            .into_iter()
            .map(|row: PgRow| {
                let last_ts: Option<DateTime<Utc>> = row.try_get("last_ts")
                    .map_err(|e| AppError::db_query("Failed to read last_ts", e))?;
                Ok(ConversationSummary {
                    id: row.try_get("id")
                        .map_err(|e| AppError::db_query("Failed to read id", e))?,
                    title: row.try_get("title")
                        .map_err(|e| AppError::db_query("Failed to read title", e))?,
                    last_ts: last_ts.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;
        sort_by_recent_activity(&mut summaries);
        Ok(summaries)
    }
}
