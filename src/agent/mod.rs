pub mod prompt;

use async_trait::async_trait;
use rig::client::Nothing;
use rig::completion::Prompt;
use rig::prelude::CompletionClient;
use rig::providers::ollama;
use tracing::{debug, error};

use crate::errors::AppError;

pub use prompt::{ChatTemplate, ChatTemplateKind, DEFAULT_SYSTEM_PROMPT};

/// Turns a fully rendered prompt into a completed reply.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AppError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { model: "phi3".to_string(), temperature: 0.7, max_tokens: 400 }
    }
}

/// Engine backed by a local Ollama server through the rig [`ollama::Client`].
/// A fresh agent is built per request; the prompt already carries the history.
#[derive(Clone)]
pub struct OllamaEngine {
    client: ollama::Client,
    base_url: String,
    params: GenerationParams,
}

impl OllamaEngine {
    pub fn new(base_url: &str, params: GenerationParams) -> Result<Self, AppError> {
        let client = ollama::Client::builder()
            .api_key(Nothing)
            .base_url(base_url)
            .build()
            .map_err(|e| AppError::Unexpected(format!("Failed to build Ollama client: {e}")))?;
        Ok(Self { client, base_url: base_url.to_string(), params })
    }

    fn classify_failure(&self, message: String) -> AppError {
        if message.contains("Connection refused") || message.contains("connect") {
            AppError::OllamaUnavailable { host: self.base_url.clone() }
        } else if message.contains("model") {
            AppError::ModelNotFound { model_name: self.params.model.clone() }
        } else {
            AppError::InferenceError { message }
        }
    }
}

#[async_trait]
impl GenerationEngine for OllamaEngine {
    async fn generate(&self, prompt: &str) -> Result<String, AppError> {
        let agent = self
            .client
            .agent(&self.params.model)
            .temperature(self.params.temperature)
            .max_tokens(self.params.max_tokens)
            .build();

        debug!(model = %self.params.model, prompt_chars = prompt.chars().count(), "Invoking Ollama");
        agent.prompt(prompt).await.map_err(|e| {
            error!("Ollama inference failed: {e}");
            self.classify_failure(e.to_string())
        })
    }
}
