//! Audio output abstraction.

use async_trait::async_trait;
use thiserror::Error;
use tts::AudioFormat;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("failed to open audio device: {0}")]
    Open(String),
    #[error("audio device I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("audio device exited with {0}")]
    Exited(String),
}

/// Something that can be opened for playback.
#[async_trait]
pub trait AudioDevice: Send + Sync {
    async fn open(&self, format: AudioFormat) -> Result<Box<dyn AudioSink>, PlaybackError>;

    fn name(&self) -> &str;
}

/// An open output.
#[async_trait]
pub trait AudioSink: Send {
    /// Hand PCM to the device. May wait while the device buffer is full.
    async fn play(&mut self, pcm: &[u8]) -> Result<(), PlaybackError>;

    /// Let buffered audio finish, then release the device.
    async fn finish(&mut self) -> Result<(), PlaybackError>;

    /// Stop immediately, dropping buffered audio.
    async fn abort(&mut self);
}

/// Discards audio. With pacing enabled each block takes as long as it would
/// to hear it.
#[derive(Clone, Debug, Default)]
pub struct NullDevice {
    pace: bool,
}

impl NullDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paced() -> Self {
        Self { pace: true }
    }
}

struct NullSink {
    format: AudioFormat,
    pace: bool,
}

#[async_trait]
impl AudioDevice for NullDevice {
    async fn open(&self, format: AudioFormat) -> Result<Box<dyn AudioSink>, PlaybackError> {
        Ok(Box::new(NullSink {
            format,
            pace: self.pace,
        }))
    }

    fn name(&self) -> &str {
        "null"
    }
}

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&mut self, pcm: &[u8]) -> Result<(), PlaybackError> {
        if self.pace {
            tokio::time::sleep(self.format.duration_of(pcm.len())).await;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn abort(&mut self) {}
}
