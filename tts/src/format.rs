use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Result, TTSError};

/// Layout of signed 16-bit little-endian PCM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// What the playback device is fed.
    pub const PLAYBACK: AudioFormat = AudioFormat::new(44_100, 2);
    /// Raw `pcm` output of OpenAI-compatible speech endpoints.
    pub const SPEECH_API: AudioFormat = AudioFormat::new(24_000, 1);

    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Reject layouts that cannot carry audio.
    pub fn validate(self) -> Result<Self> {
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(TTSError::UnsupportedFormat(format!(
                "{} Hz with {} channels",
                self.sample_rate, self.channels
            )));
        }
        Ok(self)
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2
    }

    /// Byte length of `duration` of audio, rounded to whole frames.
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as f64 * duration.as_secs_f64()).round() as usize;
        frames * self.bytes_per_frame()
    }

    pub fn duration_of(&self, bytes: usize) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = bytes / self.bytes_per_frame();
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    pub fn silence(&self, duration: Duration) -> Vec<u8> {
        vec![0; self.bytes_for(duration)]
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::PLAYBACK
    }
}
