use async_trait::async_trait;
use futures_core::Stream;
use std::pin::Pin;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("network error: {0}")]
    Network(String),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response")]
    InvalidResponse,
    #[error("model not found")]
    ModelNotFound,
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for LLMError {
    fn from(e: reqwest::Error) -> Self {
        LLMError::Network(e.to_string())
    }
}

/// Incremental text produced by a backend for one prompt.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, LLMError>> + Send>>;

/// A language-model backend able to stream a reply.
///
/// The model, system prompt and sampling options are fixed when the client is
/// built. Dropping the returned stream aborts the request.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn stream_chat(&self, prompt: &str) -> Result<ChatStream, LLMError>;

    /// Load the model ahead of the first request.
    async fn prewarm(&self) -> Result<(), LLMError> {
        Ok(())
    }

    /// Short name used in log lines.
    fn name(&self) -> &str;
}
