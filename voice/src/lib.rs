//! Spoken replies: one question in, audio out, with barge-in.
//!
//! A [`TurnController`] wires a [`llm::TokenStream`], a
//! [`tts::SynthesisStage`] and a [`PlaybackStage`] together for each turn,
//! cancels them on [`TurnController::interrupt`] and reports
//! [`TurnMetrics`].

mod config;
mod device;
mod ffplay;
mod metrics;
mod playback;
mod turn;

pub use config::PipelineConfig;
pub use device::{AudioDevice, AudioSink, NullDevice, PlaybackError};
pub use ffplay::FfplayDevice;
pub use metrics::TurnMetrics;
pub use playback::{PlaybackReport, PlaybackStage, PlaybackState};
pub use turn::{InterruptHandle, TurnController, TurnError, TurnOutcome, TurnReport};

pub use llm::CancelSignal;
pub use tts::AudioFormat;
