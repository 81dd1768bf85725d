use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{AudioFormat, Result};

/// Raw PCM produced for one chunk, in the order it should be heard.
pub type PcmStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

pub struct TtsAudio {
    pub format: AudioFormat,
    pub stream: PcmStream,
}

/// Text-to-speech engine interface.
#[async_trait]
pub trait Tts: Send + Sync {
    /// Start synthesizing `text`. Dropping the returned stream abandons the
    /// request.
    async fn synthesize(&self, text: &str) -> Result<TtsAudio>;

    /// Short name used in log lines.
    fn name(&self) -> &str {
        "tts"
    }
}
