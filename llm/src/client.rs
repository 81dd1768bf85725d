//! HTTP client for interacting with an Ollama language model server.
//!
//! This module provides the [`OllamaClient`] type which implements the
//! [`LLMClient`] trait by streaming completions from a running Ollama
//! instance.

use crate::traits::{ChatStream, LLMClient, LLMError};
use async_trait::async_trait;
use tokio_stream::StreamExt;
use tracing::info;

use ollama_rs::{generation::completion::request::GenerationRequest, Ollama};

pub struct OllamaClient {
    inner: Ollama,
    model: String,
    system_prompt: Option<String>,
}

impl OllamaClient {
    pub fn new(base_url: impl AsRef<str>, model: impl Into<String>) -> Result<Self, LLMError> {
        let inner = Ollama::try_new(base_url.as_ref())
            .map_err(|e| LLMError::Config(format!("invalid Ollama URL: {e}")))?;
        Ok(Self {
            inner,
            model: model.into(),
            system_prompt: None,
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, prompt: &str) -> GenerationRequest {
        let req = GenerationRequest::new(self.model.clone(), prompt.to_string());
        match &self.system_prompt {
            Some(system) => req.system(system.clone()),
            None => req,
        }
    }
}

#[async_trait]
impl LLMClient for OllamaClient {
    async fn stream_chat(&self, prompt: &str) -> Result<ChatStream, LLMError> {
        let stream = self
            .inner
            .generate_stream(self.request(prompt))
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;
        let mapped = stream.map(|res| {
            res.map_err(|e| LLMError::Network(e.to_string()))
                .map(|chunk| {
                    chunk
                        .into_iter()
                        .map(|c| c.response)
                        .collect::<Vec<_>>()
                        .join("")
                })
        });
        Ok(Box::pin(mapped))
    }

    async fn prewarm(&self) -> Result<(), LLMError> {
        info!(model = %self.model, "prewarming Ollama model");
        self.inner
            .generate(GenerationRequest::new(self.model.clone(), "hi".to_string()))
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
