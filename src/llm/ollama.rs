//! Ollama backend implementation.
//!
//! Ollama is a local LLM server; this is the default backend.

use super::{http_client, ChatMessage};
use crate::config::GenerationOptions;
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ollama backend for local LLM inference.
pub struct OllamaBackend {
    pub model: String,
    host: String,
    options: GenerationOptions,
    client: Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend.
    pub fn new(model: String, host: String, options: GenerationOptions) -> Result<Self> {
        // Local models on modest hardware can take a while per reply.
        let client = http_client(Duration::from_secs(120))?;

        Ok(Self {
            model,
            host: host.trim_end_matches('/').to_string(),
            options,
            client,
        })
    }

    /// Send the conversation to `/api/chat` and return the assistant reply.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/api/chat", self.host);

        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: self.options.temperature,
                num_predict: self.options.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to connect to Ollama")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Ollama request failed with status {}: {}",
                status,
                body
            ));
        }

        let chat: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(chat.message.content)
    }

    /// Check if the backend is available/reachable.
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.host);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("Failed to connect to Ollama - is it running?")?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow!("Ollama health check failed: {}", response.status()))
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    #[allow(dead_code)]
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_shape() {
        let messages = [ChatMessage::system("be brief"), ChatMessage::user("hello")];
        let request = OllamaChatRequest {
            model: "llama3",
            messages: &messages,
            stream: false,
            options: OllamaOptions {
                temperature: None,
                num_predict: Some(64),
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "llama3");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["options"]["num_predict"], 64);
        assert!(json["options"].get("temperature").is_none());
    }

    #[test]
    fn test_chat_response_parse() {
        let body = r#"{"model":"llama3","message":{"role":"assistant","content":"feed"},"done":true}"#;
        let parsed: OllamaChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.message.content, "feed");
    }

    #[test]
    fn test_host_trailing_slash_trimmed() {
        let backend = OllamaBackend::new(
            "llama3".to_string(),
            "http://localhost:11434/".to_string(),
            GenerationOptions::default(),
        )
        .unwrap();
        assert_eq!(backend.host, "http://localhost:11434");
    }
}
