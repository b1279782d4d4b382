//! Configuration management for llmbridge.
//!
//! Configuration is loaded from `~/.config/llmbridge/config.toml` and then
//! overridden by command-line flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backend configuration.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Sampling options passed to the backend.
    #[serde(default)]
    pub generation: GenerationOptions,
    /// Bridge behaviour.
    #[serde(default)]
    pub bridge: BridgeSettings,
}

/// Backend configuration for LLM providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Ollama local backend.
    Ollama {
        /// Model name (default: llama3).
        #[serde(default = "default_ollama_model")]
        model: String,
        /// Ollama host URL (default: http://localhost:11434).
        #[serde(default = "default_ollama_host")]
        host: String,
    },
    /// Anthropic Claude API.
    Anthropic {
        /// Model name (default: claude-3-5-haiku-latest).
        #[serde(default = "default_anthropic_model")]
        model: String,
        /// API key (prefer ANTHROPIC_API_KEY env var).
        #[serde(default)]
        api_key: Option<String>,
    },
    /// OpenAI API.
    OpenAI {
        /// Model name (default: gpt-4o-mini).
        #[serde(default = "default_openai_model")]
        model: String,
        /// API key (prefer OPENAI_API_KEY env var).
        #[serde(default)]
        api_key: Option<String>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Ollama {
            model: default_ollama_model(),
            host: default_ollama_host(),
        }
    }
}

/// Backend kinds selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    Ollama,
    Anthropic,
    #[value(name = "openai")]
    OpenAI,
}

impl BackendConfig {
    /// A default-initialised config for the given backend kind.
    pub fn for_kind(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Ollama => BackendConfig::default(),
            BackendKind::Anthropic => BackendConfig::Anthropic {
                model: default_anthropic_model(),
                api_key: None,
            },
            BackendKind::OpenAI => BackendConfig::OpenAI {
                model: default_openai_model(),
                api_key: None,
            },
        }
    }

    /// Get the backend kind.
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Ollama { .. } => BackendKind::Ollama,
            BackendConfig::Anthropic { .. } => BackendKind::Anthropic,
            BackendConfig::OpenAI { .. } => BackendKind::OpenAI,
        }
    }

    fn model_mut(&mut self) -> &mut String {
        match self {
            BackendConfig::Ollama { model, .. }
            | BackendConfig::Anthropic { model, .. }
            | BackendConfig::OpenAI { model, .. } => model,
        }
    }
}

fn default_ollama_model() -> String {
    "llama3".to_string()
}

fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Sampling options shared by all backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Sampling temperature; backend default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens; backend default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Settings for the bridge between the child process and the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Line the child prints to mark the end of a prompt block.
    #[serde(default = "default_end_of_prompt")]
    pub end_of_prompt: String,
    /// System prompt sent ahead of the conversation. Empty disables it.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Send previous blocks and replies along with each new block.
    #[serde(default = "default_true")]
    pub history: bool,
    /// Keep at most this many block/reply pairs of history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_turns: Option<usize>,
    /// Pause before each reply is written to the child.
    #[serde(default)]
    pub reply_delay_ms: u64,
    /// How long the reader, responder and writer get to wind down.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// How long the child gets to exit after its stdin is closed.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Echo blocks and replies to the terminal.
    #[serde(default = "default_true")]
    pub echo: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            end_of_prompt: default_end_of_prompt(),
            system_prompt: default_system_prompt(),
            history: true,
            history_turns: None,
            reply_delay_ms: 0,
            drain_timeout_ms: default_drain_timeout_ms(),
            grace_period_ms: default_grace_period_ms(),
            echo: true,
        }
    }
}

impl BridgeSettings {
    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.reply_delay_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

fn default_end_of_prompt() -> String {
    "THE END OF PROMPT".to_string()
}

fn default_system_prompt() -> String {
    "You are a terse, literal assistant connected to a command-line program. \
     Each message you receive is output from that program. Find the \
     instructions or question in it and answer exactly in the format the \
     program asks for. The other side is a program, not a person: reply with \
     the answer only, without markdown emphasis such as ** or __ and without \
     filler like 'Sure, here is the answer:'."
        .to_string()
}

fn default_drain_timeout_ms() -> u64 {
    5_000
}

fn default_grace_period_ms() -> u64 {
    3_000
}

fn default_true() -> bool {
    true
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backend: Option<BackendKind>,
    pub model: Option<String>,
    pub host: Option<String>,
    pub end_of_prompt: Option<String>,
    pub system_prompt: Option<String>,
    pub no_history: bool,
    pub history_turns: Option<usize>,
    pub reply_delay_ms: Option<u64>,
    pub grace_period_ms: Option<u64>,
    pub quiet: bool,
}

impl Config {
    /// Get the config directory path.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("llmbridge"))
            .context("Could not determine config directory")
    }

    /// Get the default config file path.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a file, using defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    /// Apply command-line overrides on top of the loaded file.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(kind) = overrides.backend {
            if kind != self.backend.kind() {
                self.backend = BackendConfig::for_kind(kind);
            }
        }
        if let Some(model) = overrides.model {
            *self.backend.model_mut() = model;
        }
        if let Some(new_host) = overrides.host {
            if let BackendConfig::Ollama { host, .. } = &mut self.backend {
                *host = new_host;
            }
        }
        if let Some(marker) = overrides.end_of_prompt {
            self.bridge.end_of_prompt = marker;
        }
        if let Some(prompt) = overrides.system_prompt {
            self.bridge.system_prompt = prompt;
        }
        if overrides.no_history {
            self.bridge.history = false;
        }
        if overrides.history_turns.is_some() {
            self.bridge.history_turns = overrides.history_turns;
        }
        if let Some(delay) = overrides.reply_delay_ms {
            self.bridge.reply_delay_ms = delay;
        }
        if let Some(grace) = overrides.grace_period_ms {
            self.bridge.grace_period_ms = grace;
        }
        if overrides.quiet {
            self.bridge.echo = false;
        }
    }

    /// Reject settings the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.bridge.end_of_prompt.trim().is_empty() {
            anyhow::bail!("end_of_prompt must not be empty");
        }
        Ok(())
    }

    /// Get the backend type as a string.
    pub fn backend_type(&self) -> &'static str {
        match &self.backend {
            BackendConfig::Ollama { .. } => "ollama",
            BackendConfig::Anthropic { .. } => "anthropic",
            BackendConfig::OpenAI { .. } => "openai",
        }
    }

    /// Get the model name.
    pub fn model_name(&self) -> &str {
        match &self.backend {
            BackendConfig::Ollama { model, .. }
            | BackendConfig::Anthropic { model, .. }
            | BackendConfig::OpenAI { model, .. } => model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(matches!(config.backend, BackendConfig::Ollama { .. }));
        assert_eq!(config.model_name(), "llama3");
        assert_eq!(config.bridge.end_of_prompt, "THE END OF PROMPT");
        assert!(config.bridge.history);
        assert!(config.bridge.echo);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("ollama"));
        assert!(toml.contains("end_of_prompt"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
[backend]
type = "anthropic"
model = "claude-3-5-haiku-latest"

[generation]
temperature = 0.2

[bridge]
end_of_prompt = "DONE"
history = false
reply_delay_ms = 250
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(matches!(config.backend, BackendConfig::Anthropic { .. }));
        assert_eq!(config.generation.temperature, Some(0.2));
        assert_eq!(config.bridge.end_of_prompt, "DONE");
        assert!(!config.bridge.history);
        assert_eq!(config.bridge.reply_delay(), Duration::from_millis(250));
        // Unspecified fields fall back to defaults.
        assert_eq!(config.bridge.grace_period_ms, 3_000);
    }

    #[test]
    fn test_overrides_replace_model_and_marker() {
        let mut config = Config::default();
        config.apply(Overrides {
            model: Some("mistral".to_string()),
            end_of_prompt: Some("DONE".to_string()),
            no_history: true,
            quiet: true,
            ..Overrides::default()
        });
        assert_eq!(config.model_name(), "mistral");
        assert_eq!(config.bridge.end_of_prompt, "DONE");
        assert!(!config.bridge.history);
        assert!(!config.bridge.echo);
    }

    #[test]
    fn test_backend_override_switches_provider() {
        let mut config = Config::default();
        config.apply(Overrides {
            backend: Some(BackendKind::OpenAI),
            ..Overrides::default()
        });
        assert_eq!(config.backend_type(), "openai");
        assert_eq!(config.model_name(), "gpt-4o-mini");
    }

    #[test]
    fn test_host_override_applies_to_ollama() {
        let mut config = Config::default();
        config.apply(Overrides {
            host: Some("http://gpu-box:11434".to_string()),
            ..Overrides::default()
        });
        match config.backend {
            BackendConfig::Ollama { host, .. } => assert_eq!(host, "http://gpu-box:11434"),
            other => panic!("unexpected backend: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_blank_marker() {
        let mut config = Config::default();
        config.bridge.end_of_prompt = "   ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("llmbridge-definitely-missing.toml");
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.model_name(), "llama3");
    }
}
