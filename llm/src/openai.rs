//! Client for OpenAI-compatible chat completion endpoints.
//!
//! Replies are requested with `stream: true` and arrive as server-sent
//! events. Each `data:` line carries a JSON chunk whose
//! `choices[0].delta.content` is forwarded; `data: [DONE]` ends the stream.

use crate::traits::{ChatStream, LLMClient, LLMError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{debug, info};

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Deserialize)]
struct ChatChunk {
    choices: Vec<ChunkChoice>,
}

/// Result of feeding one SSE line to [`parse_sse_line`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseLine {
    Delta(String),
    Done,
    Skip,
}

pub(crate) fn parse_sse_line(line: &str) -> Result<SseLine, LLMError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    let chunk: ChatChunk = serde_json::from_str(data).map_err(|_| LLMError::InvalidResponse)?;
    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    if text.is_empty() {
        Ok(SseLine::Skip)
    } else {
        Ok(SseLine::Delta(text))
    }
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
            system_prompt: None,
            temperature: 0.7,
            max_tokens: 500,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    async fn post(&self, prompt: &str, stream: bool, max_tokens: u32) -> Result<reqwest::Response, LLMError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream,
            temperature: self.temperature,
            max_tokens,
        };
        let mut req = self.client.post(self.completions_url()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LLMError::ModelNotFound);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LLMError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl LLMClient for OpenAiClient {
    async fn stream_chat(&self, prompt: &str) -> Result<ChatStream, LLMError> {
        let resp = self.post(prompt, true, self.max_tokens).await?;
        let mut bytes = Box::pin(resp.bytes_stream());
        let stream = async_stream::stream! {
            let mut pending: Vec<u8> = Vec::new();
            'read: while let Some(piece) = bytes.next().await {
                let piece = match piece {
                    Ok(b) => b,
                    Err(e) => {
                        yield Err(LLMError::from(e));
                        break;
                    }
                };
                pending.extend_from_slice(&piece);
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw);
                    match parse_sse_line(&line) {
                        Ok(SseLine::Delta(text)) => yield Ok(text),
                        Ok(SseLine::Done) => break 'read,
                        Ok(SseLine::Skip) => {}
                        Err(e) => {
                            debug!(line = %line.trim(), "unparseable SSE line");
                            yield Err(e);
                            break 'read;
                        }
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn prewarm(&self) -> Result<(), LLMError> {
        info!(model = %self.model, "prewarming OpenAI-compatible model");
        self.post("hi", false, 1).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "openai"
    }
}
