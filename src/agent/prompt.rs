use std::str::FromStr;

use crate::errors::AppError;
use crate::models::{Message, MessageRole};

/// System instruction used when `SYSTEM_PROMPT` is not set.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Sei un assistente tecnico che risponde in italiano. \
                                         Sii conciso, accurato e cordiale. \
                                         Se non conosci la risposta, dillo.";

/// Role markers a model expects around each turn.
///
/// The engine only sees the rendered string, so the markers have to match the
/// chat format the loaded model was trained on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTemplate {
    pub system_prefix: String,
    pub user_prefix: String,
    pub assistant_prefix: String,
    pub turn_suffix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplateKind {
    Plain,
    Phi3,
}

impl FromStr for ChatTemplateKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plain" => Ok(ChatTemplateKind::Plain),
            "phi3" | "phi-3" => Ok(ChatTemplateKind::Phi3),
            other => Err(AppError::InvalidConfig {
                key: "CHAT_TEMPLATE".to_string(),
                value: other.to_string(),
                reason: "expected 'plain' or 'phi3'".to_string(),
            }),
        }
    }
}

impl From<ChatTemplateKind> for ChatTemplate {
    fn from(kind: ChatTemplateKind) -> Self {
        match kind {
            ChatTemplateKind::Plain => ChatTemplate::plain(),
            ChatTemplateKind::Phi3 => ChatTemplate::phi3(),
        }
    }
}

impl ChatTemplate {
    /// `Role: text` lines, for engines that apply their own chat format.
    pub fn plain() -> Self {
        Self {
            system_prefix: "System: ".to_string(),
            user_prefix: "User: ".to_string(),
            assistant_prefix: "Assistant: ".to_string(),
            turn_suffix: String::new(),
        }
    }

    /// Phi-3 instruct markers (`<|user|>` … `<|end|>`).
    pub fn phi3() -> Self {
        Self {
            system_prefix: "<|system|>\n".to_string(),
            user_prefix: "<|user|>\n".to_string(),
            assistant_prefix: "<|assistant|>\n".to_string(),
            turn_suffix: "<|end|>".to_string(),
        }
    }

    fn prefix(&self, role: MessageRole) -> &str {
        match role {
            MessageRole::User => &self.user_prefix,
            MessageRole::Assistant => &self.assistant_prefix,
        }
    }

    /// Renders the system instruction and the whole history, ending with an
    /// open assistant turn for the model to complete.
    pub fn render(&self, system: &str, history: &[Message]) -> String {
        let mut lines = Vec::with_capacity(history.len() + 2);
        lines.push(format!("{}{}{}", self.system_prefix, system, self.turn_suffix));
        for message in history {
            lines.push(format!("{}{}{}", self.prefix(message.role), message.text, self.turn_suffix));
        }
        lines.push(self.assistant_prefix.trim_end().to_string());
        lines.join("\n")
    }
}
