//! One-time backend selection.
//!
//! A [`BackendConfig`] names the backend kind and its connection details.
//! [`client_from_config`] turns it into the `Arc<dyn LLMClient>` that a turn
//! controller keeps for its whole lifetime.

use crate::openai::DEFAULT_OPENAI_URL;
use crate::traits::{LLMClient, LLMError};
use crate::{OllamaClient, OpenAiClient};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "gemma3:27b";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Ollama,
    OpenAi,
}

impl FromStr for BackendKind {
    type Err = LLMError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(BackendKind::Ollama),
            "openai" => Ok(BackendKind::OpenAi),
            other => Err(LLMError::Config(format!("unknown LLM backend `{other}`"))),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Base URL. Falls back to the backend's usual address.
    pub url: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub api_key: Option<String>,
}

impl BackendConfig {
    /// Read the configuration from environment variables.
    ///
    /// `LLM_BACKEND` selects `ollama` (default) or `openai`. Ollama reads
    /// `OLLAMA_URL` and `OLLAMA_MODEL`; OpenAI reads `OPENAI_BASE_URL`,
    /// `OPENAI_MODEL` and `OPENAI_API_KEY`. `LLM_SYSTEM_PROMPT` applies to
    /// both.
    pub fn from_env() -> Result<Self, LLMError> {
        let kind = match std::env::var("LLM_BACKEND") {
            Ok(v) if !v.trim().is_empty() => v.parse()?,
            _ => BackendKind::default(),
        };
        Ok(Self::from_env_for(kind))
    }

    /// Like [`BackendConfig::from_env`] with the backend kind already chosen.
    pub fn from_env_for(kind: BackendKind) -> Self {
        let (url_var, model_var) = match kind {
            BackendKind::Ollama => ("OLLAMA_URL", "OLLAMA_MODEL"),
            BackendKind::OpenAi => ("OPENAI_BASE_URL", "OPENAI_MODEL"),
        };
        Self {
            kind,
            url: std::env::var(url_var).ok(),
            model: std::env::var(model_var).ok(),
            system_prompt: std::env::var("LLM_SYSTEM_PROMPT").ok(),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
        }
    }
}

/// Build the client described by `config`.
pub fn client_from_config(config: &BackendConfig) -> Result<Arc<dyn LLMClient>, LLMError> {
    match config.kind {
        BackendKind::Ollama => {
            let url = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);
            let model = config.model.as_deref().unwrap_or(DEFAULT_OLLAMA_MODEL);
            let mut client = OllamaClient::new(url, model)?;
            if let Some(prompt) = &config.system_prompt {
                client = client.with_system_prompt(prompt.clone());
            }
            Ok(Arc::new(client))
        }
        BackendKind::OpenAi => {
            let url = config.url.as_deref().unwrap_or(DEFAULT_OPENAI_URL);
            let model = config.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL);
            let mut client = OpenAiClient::new(url, model);
            match &config.api_key {
                Some(key) => client = client.with_api_key(key.clone()),
                None if url == DEFAULT_OPENAI_URL => {
                    return Err(LLMError::Config("OPENAI_API_KEY is not set".into()));
                }
                None => {}
            }
            if let Some(prompt) = &config.system_prompt {
                client = client.with_system_prompt(prompt.clone());
            }
            Ok(Arc::new(client))
        }
    }
}
