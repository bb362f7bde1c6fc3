//! Runtime configuration, read from environment variables.
//!
//! Environment variables (all optional):
//! - `BIND_ADDR` / `PORT`: listen address (default `0.0.0.0:8080`)
//! - `DATABASE_URL`: use PostgreSQL instead of the JSON file store
//! - `CONVERSATIONS_FILE`: JSON store path (default `conversations.json`)
//! - `OLLAMA_API_BASE_URL`, `OLLAMA_MODEL`: generation engine
//! - `GENERATION_TEMPERATURE`, `GENERATION_MAX_TOKENS`: sampling parameters
//! - `CHAT_TEMPLATE`: `plain` or `phi3` role markers
//! - `SYSTEM_PROMPT`: system instruction placed before the history
//! - `STREAM_CHUNK_CHARS`, `STREAM_CHUNK_DELAY_MS`: chunking and pacing
//! - `EVENTS_IDLE_TIMEOUT_SECS`, `EVENTS_ATTACH_GRACE_MS`: subscriber waits
//! - `SESSION_RETENTION_SECS`: how long finished streams stay reachable

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::agent::{ChatTemplateKind, GenerationParams, DEFAULT_SYSTEM_PROMPT};
use crate::errors::AppError;
use crate::stream::{RelayConfig, SessionConfig};

#[derive(Debug, Clone)]
pub enum StorageBackend {
    JsonFile(PathBuf),
    Postgres(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub port: u16,
    pub storage: StorageBackend,
    pub ollama_base_url: String,
    pub generation: GenerationParams,
    pub session: SessionConfig,
    pub relay: RelayConfig,
    pub session_retention: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
            storage: StorageBackend::JsonFile(PathBuf::from("conversations.json")),
            ollama_base_url: "http://localhost:11434".to_string(),
            generation: GenerationParams::default(),
            session: SessionConfig::default(),
            relay: RelayConfig::default(),
            session_retention: Duration::from_secs(600),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; unset keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let vars = Vars(&lookup);

        let storage = match vars.get("DATABASE_URL") {
            Some(url) => StorageBackend::Postgres(url),
            None => match vars.get("CONVERSATIONS_FILE") {
                Some(path) => StorageBackend::JsonFile(PathBuf::from(path)),
                None => defaults.storage,
            },
        };

        let template: ChatTemplateKind = vars.parse("CHAT_TEMPLATE", ChatTemplateKind::Plain)?;
        let chunk_chars: usize = vars.parse("STREAM_CHUNK_CHARS", defaults.session.chunk_chars)?;
        if chunk_chars == 0 {
            return Err(AppError::InvalidConfig {
                key: "STREAM_CHUNK_CHARS".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            bind_addr: vars.get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: vars.parse("PORT", defaults.port)?,
            storage,
            ollama_base_url: vars.get("OLLAMA_API_BASE_URL").unwrap_or(defaults.ollama_base_url),
            generation: GenerationParams {
                model: vars.get("OLLAMA_MODEL").unwrap_or(defaults.generation.model),
                temperature: vars.parse("GENERATION_TEMPERATURE", defaults.generation.temperature)?,
                max_tokens: vars.parse("GENERATION_MAX_TOKENS", defaults.generation.max_tokens)?,
            },
            session: SessionConfig {
                chunk_chars,
                chunk_delay: Duration::from_millis(vars.parse("STREAM_CHUNK_DELAY_MS", 30)?),
                system_prompt: vars
                    .get("SYSTEM_PROMPT")
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
                template: template.into(),
            },
            relay: RelayConfig {
                attach_grace: Duration::from_millis(vars.parse("EVENTS_ATTACH_GRACE_MS", 5000)?),
                idle_timeout: Duration::from_secs(vars.parse("EVENTS_IDLE_TIMEOUT_SECS", 60)?),
            },
            session_retention: Duration::from_secs(vars.parse("SESSION_RETENTION_SECS", 600)?),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    /// Non-blank value of `key`, trimmed.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, AppError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| AppError::InvalidConfig {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }
}
