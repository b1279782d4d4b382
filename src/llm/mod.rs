//! LLM backend implementations.
//!
//! The bridge talks to models through the [`Completer`] trait. [`Backend`]
//! implements it for Ollama (local) and the Anthropic and OpenAI cloud APIs.

pub mod anthropic;
pub mod ollama;
pub mod openai;

use crate::config::{BackendConfig, GenerationOptions};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
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

/// A model that turns a conversation into the next assistant reply.
#[async_trait]
pub trait Completer: Send + Sync {
    /// Request a single, non-streamed reply for the conversation.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Enum-based backend for LLM providers.
pub enum Backend {
    Ollama(ollama::OllamaBackend),
    Anthropic(anthropic::AnthropicBackend),
    OpenAI(openai::OpenAIBackend),
}

impl Backend {
    /// Get the backend name.
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Ollama(_) => "ollama",
            Backend::Anthropic(_) => "anthropic",
            Backend::OpenAI(_) => "openai",
        }
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        match self {
            Backend::Ollama(b) => &b.model,
            Backend::Anthropic(b) => &b.model,
            Backend::OpenAI(b) => &b.model,
        }
    }

    /// Check if the backend is available/reachable.
    pub async fn health_check(&self) -> Result<()> {
        match self {
            Backend::Ollama(b) => b.health_check().await,
            Backend::Anthropic(b) => b.health_check(),
            Backend::OpenAI(b) => b.health_check(),
        }
    }
}

#[async_trait]
impl Completer for Backend {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let raw = match self {
            Backend::Ollama(b) => b.chat(messages).await?,
            Backend::Anthropic(b) => b.chat(messages).await?,
            Backend::OpenAI(b) => b.chat(messages).await?,
        };
        Ok(clean_reply(&raw))
    }
}

/// Create a backend from configuration.
pub fn create_backend(config: &BackendConfig, options: &GenerationOptions) -> Result<Backend> {
    let backend = match config {
        BackendConfig::Ollama { model, host } => Backend::Ollama(ollama::OllamaBackend::new(
            model.clone(),
            host.clone(),
            options.clone(),
        )?),
        BackendConfig::Anthropic { model, api_key } => {
            Backend::Anthropic(anthropic::AnthropicBackend::new(
                model.clone(),
                api_key.clone(),
                options.clone(),
            )?)
        }
        BackendConfig::OpenAI { model, api_key } => Backend::OpenAI(
            openai::OpenAIBackend::new(model.clone(), api_key.clone(), options.clone())?,
        ),
    };
    Ok(backend)
}

/// Build the HTTP client shared by a backend's requests.
fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Normalise a raw model reply before it is typed into the child.
///
/// Trims surrounding whitespace and unwraps a reply that was fenced as a
/// markdown code block.
pub fn clean_reply(raw: &str) -> String {
    let reply = raw.trim();

    if let Some(fenced) = reply.strip_prefix("```") {
        // Drop the language tag line, then the closing fence.
        let body = fenced.split_once('\n').map_or("", |(_, rest)| rest);
        let body = body.trim_end();
        let body = body.strip_suffix("```").unwrap_or(body);
        return body.trim().to_string();
    }

    reply.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_reply_plain() {
        assert_eq!(clean_reply("  north \n"), "north");
    }

    #[test]
    fn test_clean_reply_code_block() {
        assert_eq!(clean_reply("```text\nfeed\nplay\n```"), "feed\nplay");
    }

    #[test]
    fn test_clean_reply_keeps_inner_backticks() {
        assert_eq!(clean_reply("use `look`"), "use `look`");
    }

    #[test]
    fn test_chat_message_serializes_lowercase_role() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn test_create_backend_from_default_config() {
        let backend =
            create_backend(&BackendConfig::default(), &GenerationOptions::default()).unwrap();
        assert_eq!(backend.name(), "ollama");
        assert_eq!(backend.model(), "llama3");
    }
}
