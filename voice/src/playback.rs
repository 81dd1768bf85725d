//! Consumer side of a turn: blocks out of the queue, into the device.

use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tts::{AudioFormat, BlockReceiver, QueueItem};

use crate::device::{AudioDevice, AudioSink, PlaybackError};
use llm::CancelSignal;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    WaitingFirstBlock,
    Playing,
    DrainingCancelled,
    Finished,
    Failed,
}

#[derive(Debug)]
pub struct PlaybackReport {
    pub state: PlaybackState,
    pub blocks_played: u64,
    pub blocks_discarded: u64,
    pub first_play: Option<Instant>,
    pub error: Option<PlaybackError>,
}

type FailureHook = Box<dyn FnOnce(&PlaybackError) + Send>;

pub struct PlaybackStage {
    device: Arc<dyn AudioDevice>,
    format: AudioFormat,
    on_failure: Option<FailureHook>,
}

impl PlaybackStage {
    pub fn new(device: Arc<dyn AudioDevice>, format: AudioFormat) -> Self {
        Self {
            device,
            format,
            on_failure: None,
        }
    }

    /// Called once when the device fails, before the stage starts draining.
    pub fn on_failure(mut self, hook: impl FnOnce(&PlaybackError) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    /// Play blocks until the end-of-stream marker.
    ///
    /// Once `cancel` is set, or the device failed, remaining blocks are
    /// discarded but still read so the producer never stalls. The device is
    /// opened on the first block to play; `on_first_play` receives the time
    /// that block was handed to it.
    pub async fn run<F>(mut self, mut queue: BlockReceiver, cancel: CancelSignal, on_first_play: F) -> PlaybackReport
    where
        F: FnOnce(Instant) + Send,
    {
        let mut on_first_play = Some(on_first_play);
        let mut sink: Option<Box<dyn AudioSink>> = None;
        let mut report = PlaybackReport {
            state: PlaybackState::WaitingFirstBlock,
            blocks_played: 0,
            blocks_discarded: 0,
            first_play: None,
            error: None,
        };

        loop {
            let draining = matches!(
                report.state,
                PlaybackState::DrainingCancelled | PlaybackState::Failed
            );
            if !draining && cancel.is_cancelled() {
                info!(played = report.blocks_played, "playback interrupted");
                report.state = PlaybackState::DrainingCancelled;
                if let Some(mut s) = sink.take() {
                    s.abort().await;
                }
                continue;
            }

            let item = if draining {
                queue.recv().await
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => continue,
                    item = queue.recv() => item,
                }
            };
            let block = match item {
                Some(QueueItem::Block(block)) => block,
                Some(QueueItem::EndOfStream) => break,
                None => {
                    warn!("block queue closed without end marker");
                    break;
                }
            };
            if draining {
                report.blocks_discarded += 1;
                debug!(seq = block.seq, "discarding block");
                continue;
            }

            if sink.is_none() {
                match self.device.open(self.format).await {
                    Ok(s) => {
                        debug!(device = self.device.name(), "audio device opened");
                        sink = Some(s);
                    }
                    Err(e) => {
                        report.blocks_discarded += 1;
                        self.fail(e, &mut report);
                        continue;
                    }
                }
            }
            let Some(out) = sink.as_mut() else { continue };

            let handed_at = Instant::now();
            let played = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = out.play(&block.pcm) => Some(res),
            };
            match played {
                None => report.blocks_discarded += 1,
                Some(Ok(())) => {
                    report.blocks_played += 1;
                    debug!(seq = block.seq, bytes = block.pcm.len(), "block played");
                    if let Some(hook) = on_first_play.take() {
                        info!(seq = block.seq, "first audio playing");
                        report.state = PlaybackState::Playing;
                        report.first_play = Some(handed_at);
                        hook(handed_at);
                    }
                }
                Some(Err(e)) => {
                    report.blocks_discarded += 1;
                    if let Some(mut s) = sink.take() {
                        s.abort().await;
                    }
                    self.fail(e, &mut report);
                }
            }
        }

        if let Some(mut s) = sink.take() {
            let closed = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = s.finish() => Some(res),
            };
            match closed {
                None => {
                    s.abort().await;
                    report.state = PlaybackState::DrainingCancelled;
                }
                Some(Err(e)) => self.fail(e, &mut report),
                Some(Ok(())) => {}
            }
        }
        if matches!(
            report.state,
            PlaybackState::WaitingFirstBlock | PlaybackState::Playing
        ) {
            report.state = PlaybackState::Finished;
        }
        info!(
            state = ?report.state,
            played = report.blocks_played,
            discarded = report.blocks_discarded,
            "playback ended"
        );
        report
    }

    fn fail(&mut self, error: PlaybackError, report: &mut PlaybackReport) {
        warn!(error = %error, "audio playback failed");
        if let Some(hook) = self.on_failure.take() {
            hook(&error);
        }
        report.state = PlaybackState::Failed;
        report.error = Some(error);
    }
}
