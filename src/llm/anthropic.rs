//! Anthropic Claude backend implementation.
//!
//! The Messages API takes the system prompt as a separate field, so system
//! messages are lifted out of the conversation before sending.

use super::{http_client, ChatMessage, Role};
use crate::config::GenerationOptions;
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic backend for Claude API.
pub struct AnthropicBackend {
    pub model: String,
    api_key: Option<String>,
    options: GenerationOptions,
    client: Client,
}

impl AnthropicBackend {
    /// Create a new Anthropic backend.
    pub fn new(model: String, api_key: Option<String>, options: GenerationOptions) -> Result<Self> {
        let client = http_client(Duration::from_secs(60))?;

        Ok(Self {
            model,
            api_key,
            options,
            client,
        })
    }

    /// Get the API key from config or environment.
    fn get_api_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| {
                anyhow!(
                    "Anthropic API key not found. Set ANTHROPIC_API_KEY environment variable \
                     or add api_key to config file."
                )
            })
    }

    /// Send the conversation and return the concatenated text blocks.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let api_key = self.get_api_key()?;
        let request = build_request(&self.model, messages, &self.options);

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .context("Failed to connect to Anthropic API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body: Result<AnthropicError, _> = response.json().await;
            let message = body
                .map(|e| e.error.message)
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Anthropic API request failed with status {}: {}",
                status,
                message
            ));
        }

        let anthropic_response: AnthropicResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic response")?;

        let text: String = anthropic_response
            .content
            .into_iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text)
            .collect();

        if text.is_empty() {
            return Err(anyhow!("Empty response from Anthropic"));
        }
        Ok(text)
    }

    /// There is no cheap health endpoint; only the key is checked.
    pub fn health_check(&self) -> Result<()> {
        self.get_api_key().map(|_| ())
    }
}

fn build_request<'a>(
    model: &'a str,
    messages: &'a [ChatMessage],
    options: &GenerationOptions,
) -> AnthropicRequest<'a> {
    let system = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    AnthropicRequest {
        model,
        max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: (!system.is_empty()).then_some(system),
        messages: messages.iter().filter(|m| m.role != Role::System).collect(),
        temperature: options.temperature,
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[allow(dead_code)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_message_lifted_out() {
        let messages = [
            ChatMessage::system("be brief"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
        ];
        let request = build_request("claude", &messages, &GenerationOptions::default());
        assert_eq!(request.system.as_deref(), Some("be brief"));
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::User);
        assert_eq!(request.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_no_system_field_without_system_message() {
        let messages = [ChatMessage::user("hello")];
        let request = build_request("claude", &messages, &GenerationOptions::default());
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("system").is_none());
    }
}
