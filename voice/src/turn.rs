//! Turn lifecycle: start, interrupt, measure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use llm::{CancelSignal, LLMClient, LLMError, TokenStream};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use tts::{block_queue, AudioFormat, ProductionEnd, SynthesisStage, TTSError, Tts};

use crate::config::PipelineConfig;
use crate::device::{AudioDevice, PlaybackError};
use crate::metrics::TurnMetrics;
use crate::playback::PlaybackStage;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("language model failed: {0}")]
    Backend(#[from] LLMError),
    #[error("speech synthesis failed: {0}")]
    Synthesis(#[from] TTSError),
    #[error("audio playback failed: {0}")]
    Playback(#[from] PlaybackError),
}

#[derive(Debug)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
    Failed(TurnError),
}

#[derive(Debug)]
pub struct TurnReport {
    pub id: u64,
    pub outcome: TurnOutcome,
    pub metrics: TurnMetrics,
    pub blocks_played: u64,
}

type ActiveTurn = Arc<Mutex<Option<CancelSignal>>>;

fn lock(active: &ActiveTurn) -> std::sync::MutexGuard<'_, Option<CancelSignal>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Interrupts whatever turn is running on the controller it came from.
#[derive(Clone)]
pub struct InterruptHandle {
    active: ActiveTurn,
}

impl InterruptHandle {
    /// Cancel the active turn. Returns `false` when no turn is running or it
    /// was already interrupted.
    pub fn interrupt(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(cancel) => cancel.cancel(),
            None => false,
        }
    }
}

/// Runs one question/answer cycle at a time.
pub struct TurnController {
    llm: Arc<dyn LLMClient>,
    tts: Arc<dyn Tts>,
    device: Arc<dyn AudioDevice>,
    config: PipelineConfig,
    active: ActiveTurn,
    turns: AtomicU64,
}

impl TurnController {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        tts: Arc<dyn Tts>,
        device: Arc<dyn AudioDevice>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            llm,
            tts,
            device,
            config,
            active: Arc::default(),
            turns: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load the language model ahead of the first turn. Failure is logged
    /// and otherwise ignored.
    pub async fn prewarm(&self) {
        let started = Instant::now();
        match self.llm.prewarm().await {
            Ok(()) => info!(
                backend = self.llm.name(),
                ms = started.elapsed().as_secs_f64() * 1000.0,
                "model prewarmed"
            ),
            Err(e) => warn!(backend = self.llm.name(), error = %e, "prewarm failed"),
        }
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            active: self.active.clone(),
        }
    }

    /// Cancel the active turn, if any.
    pub fn interrupt(&self) -> bool {
        self.interrupt_handle().interrupt()
    }

    /// Answer `prompt` out loud and report how long each part took.
    ///
    /// Returns after playback has ended, whether the reply completed, was
    /// interrupted or failed. A new turn interrupts one still running.
    pub async fn run_turn(&self, prompt: &str) -> TurnReport {
        let id = self.turns.fetch_add(1, Ordering::SeqCst) + 1;
        self.run(id, prompt).instrument(info_span!("turn", id)).await
    }

    async fn run(&self, id: u64, prompt: &str) -> TurnReport {
        let cancel = CancelSignal::new();
        if let Some(previous) = lock(&self.active).replace(cancel.clone()) {
            previous.cancel();
        }

        let question_end = Instant::now();
        info!(prompt, "turn started");
        let tokens = TokenStream::start(self.llm.clone(), prompt, cancel.clone());
        let timings = tokens.timings();

        let (tx, rx) = block_queue(self.config.queue_depth);
        let synthesis = SynthesisStage::new(self.tts.clone(), self.config.synthesis());
        let producer = {
            let cancel = cancel.clone();
            tokio::spawn(
                async move { synthesis.run(tokens, tx, cancel).await }.in_current_span(),
            )
        };

        let first_play: OnceLock<Instant> = OnceLock::new();
        let playback = PlaybackStage::new(self.device.clone(), AudioFormat::PLAYBACK).on_failure({
            let cancel = cancel.clone();
            move |_| {
                cancel.cancel();
            }
        });
        let played = playback
            .run(rx, cancel.clone(), |at| {
                let _ = first_play.set(at);
            })
            .await;

        let end = match producer.await {
            Ok(report) => report.end,
            Err(e) => ProductionEnd::SynthesisFailed(TTSError::Synthesis(format!("synthesis task ended: {e}"))),
        };

        {
            let mut active = lock(&self.active);
            if active.as_ref().is_some_and(|c| c.same_as(&cancel)) {
                *active = None;
            }
        }

        let cancelled = cancel.is_cancelled();
        let outcome = match (played.error, end) {
            (Some(e), _) => TurnOutcome::Failed(TurnError::Playback(e)),
            (None, ProductionEnd::BackendFailed(e)) => TurnOutcome::Failed(TurnError::Backend(e)),
            (None, ProductionEnd::SynthesisFailed(e)) => TurnOutcome::Failed(TurnError::Synthesis(e)),
            (None, _) if cancelled => TurnOutcome::Cancelled,
            (None, ProductionEnd::QueueClosed) => TurnOutcome::Failed(TurnError::Synthesis(TTSError::QueueClosed)),
            (None, _) => TurnOutcome::Completed,
        };

        let metrics = TurnMetrics::from_timestamps(
            question_end,
            timings.first_token(),
            timings.completed(),
            first_play.get().copied(),
        );
        match &outcome {
            TurnOutcome::Completed => info!(blocks = played.blocks_played, "turn completed"),
            TurnOutcome::Cancelled => info!(blocks = played.blocks_played, "turn interrupted"),
            TurnOutcome::Failed(e) => warn!(error = %e, blocks = played.blocks_played, "turn failed"),
        }
        info!("{metrics}");

        TurnReport {
            id,
            outcome,
            metrics,
            blocks_played: played.blocks_played,
        }
    }
}
