//! Turn streamed language-model text into queued playback audio.
//!
//! The [`SynthesisStage`] reads [`llm::TokenEvent`]s, cuts the text into
//! speakable chunks with a [`ChunkBuffer`], asks a [`Tts`] engine for audio
//! and pushes fixed-format [`SynthesisBlock`]s into a bounded queue created
//! by [`block_queue`]. The queue always ends with [`QueueItem::EndOfStream`].

mod chunker;
mod coqui;
mod engine;
mod format;
mod queue;
mod shaping;
mod speech_api;
mod stage;

pub use chunker::{normalize_chunk, ChunkBuffer, ChunkerConfig};
pub use coqui::CoquiTts;
pub use engine::{PcmStream, Tts, TtsAudio};
pub use format::AudioFormat;
pub use llm::CancelSignal;
pub use queue::{block_queue, BlockReceiver, BlockSender, QueueItem, SynthesisBlock};
pub use shaping::{apply_fades, Coalescer, Resampler};
pub use speech_api::SpeechApiTts;
pub use stage::{ProductionEnd, RenderMode, SynthesisConfig, SynthesisReport, SynthesisStage};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TTSError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("synthesizer returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid WAV data: {0}")]
    Wav(#[from] hound::Error),
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),
    #[error("resampling failed: {0}")]
    Resample(String),
    #[error("synthesis failed: {0}")]
    Synthesis(String),
    #[error("block queue closed")]
    QueueClosed,
}

/// Convenience result type used throughout this crate.
pub type Result<T> = std::result::Result<T, TTSError>;
