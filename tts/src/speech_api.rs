use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio_stream::StreamExt;
use tracing::info;

use crate::engine::{Tts, TtsAudio};
use crate::{AudioFormat, Result, TTSError};

/// Client for OpenAI-compatible `/v1/audio/speech` endpoints such as Kokoro
/// front ends. Audio is requested as raw PCM and streamed as it arrives.
#[derive(Clone)]
pub struct SpeechApiTts {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
    speed: f32,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
    speed: f32,
    stream: bool,
}

impl SpeechApiTts {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
            voice: voice.into(),
            speed: 1.0,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }
}

#[async_trait]
impl Tts for SpeechApiTts {
    async fn synthesize(&self, text: &str) -> Result<TtsAudio> {
        info!(voice = %self.voice, chars = text.len(), "requesting speech");
        let body = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: "pcm",
            speed: self.speed,
            stream: true,
        };
        let mut req = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TTSError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let stream = resp
            .bytes_stream()
            .map(|b| b.map(|bytes| bytes.to_vec()).map_err(TTSError::from));
        Ok(TtsAudio {
            format: AudioFormat::SPEECH_API,
            stream: Box::pin(stream),
        })
    }

    fn name(&self) -> &str {
        "speech-api"
    }
}
