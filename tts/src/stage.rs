//! Producer side of a turn: tokens in, audio blocks out.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use llm::{CancelSignal, LLMError, TokenEvent};
use serde::Deserialize;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::chunker::{ChunkBuffer, ChunkerConfig};
use crate::engine::{PcmStream, Tts};
use crate::queue::BlockSender;
use crate::shaping::{apply_fades, Coalescer, Resampler};
use crate::{AudioFormat, TTSError};

/// How a chunk's audio reaches the queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Blocks leave as soon as the coalescer releases them.
    #[default]
    Streamed,
    /// The whole chunk is rendered and converted before any of it is queued.
    FullSentence,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub chunker: ChunkerConfig,
    /// Preferred block length.
    pub chunk_target_ms: u64,
    /// A block shorter than the target is only released early when it holds
    /// at least this much audio.
    pub block_floor_ms: u64,
    pub flush_timeout_ms: u64,
    /// Silence inserted after each spoken chunk.
    pub inter_chunk_ms: u64,
    pub render: RenderMode,
    /// Slab length for [`RenderMode::FullSentence`]; 0 queues the chunk as
    /// one block.
    pub sentence_slice_ms: u64,
    /// Fade-in and fade-out applied to every spoken block.
    pub fade_ms: u64,
    pub playback_format: AudioFormat,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            chunk_target_ms: 220,
            block_floor_ms: 80,
            flush_timeout_ms: 80,
            inter_chunk_ms: 160,
            render: RenderMode::Streamed,
            sentence_slice_ms: 0,
            fade_ms: 0,
            playback_format: AudioFormat::PLAYBACK,
        }
    }
}

/// Why the stage stopped producing.
#[derive(Debug)]
pub enum ProductionEnd {
    Completed,
    Cancelled,
    BackendFailed(LLMError),
    SynthesisFailed(TTSError),
    /// The reader went away.
    QueueClosed,
}

#[derive(Debug)]
pub struct SynthesisReport {
    /// Chunks handed to the synthesizer.
    pub chunks: usize,
    pub blocks: u64,
    pub end: ProductionEnd,
}

pub struct SynthesisStage {
    tts: Arc<dyn Tts>,
    config: SynthesisConfig,
}

impl SynthesisStage {
    pub fn new(tts: Arc<dyn Tts>, config: SynthesisConfig) -> Self {
        Self { tts, config }
    }

    /// Consume `tokens` until a terminal event or cancellation, writing audio
    /// to `queue`. The end-of-stream marker is always written last.
    pub async fn run<S>(&self, mut tokens: S, mut queue: BlockSender, cancel: CancelSignal) -> SynthesisReport
    where
        S: Stream<Item = TokenEvent> + Unpin + Send,
    {
        let mut chunker = ChunkBuffer::new(self.config.chunker.clone());
        let mut chunks = 0usize;

        let end = 'produce: loop {
            let deadline = chunker.deadline();
            let ready = tokio::select! {
                biased;
                _ = cancel.cancelled() => break ProductionEnd::Cancelled,
                _ = sleep_until(deadline) => chunker.flush_idle(Instant::now()),
                event = tokens.next() => match event {
                    Some(TokenEvent::Token(text)) => chunker.push(&text, Instant::now()),
                    Some(TokenEvent::Completed) | None => {
                        for chunk in chunker.finish() {
                            chunks += 1;
                            if let Err(end) = self.speak(&chunk, &mut queue, &cancel).await {
                                break 'produce end;
                            }
                        }
                        break ProductionEnd::Completed;
                    }
                    Some(TokenEvent::Cancelled) => break ProductionEnd::Cancelled,
                    Some(TokenEvent::Failed(e)) => break ProductionEnd::BackendFailed(e),
                },
            };
            for chunk in ready {
                chunks += 1;
                if let Err(end) = self.speak(&chunk, &mut queue, &cancel).await {
                    break 'produce end;
                }
            }
        };

        let blocks = queue.sent();
        if queue.finish().await.is_err() {
            debug!("queue closed before end of stream");
        }
        match &end {
            ProductionEnd::SynthesisFailed(e) => warn!(error = %e, chunks, blocks, "synthesis failed"),
            ProductionEnd::BackendFailed(e) => warn!(error = %e, chunks, blocks, "reply failed"),
            other => info!(end = ?other, chunks, blocks, "synthesis finished"),
        }
        SynthesisReport { chunks, blocks, end }
    }

    /// Synthesize one chunk and enqueue its audio followed by the pause.
    async fn speak(&self, text: &str, queue: &mut BlockSender, cancel: &CancelSignal) -> Result<(), ProductionEnd> {
        if cancel.is_cancelled() {
            return Err(ProductionEnd::Cancelled);
        }
        let text: Arc<str> = Arc::from(text);
        info!(engine = self.tts.name(), chunk = %text, "synthesizing");
        let audio = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProductionEnd::Cancelled),
            res = self.tts.synthesize(&text) => res.map_err(ProductionEnd::SynthesisFailed)?,
        };

        let cfg = &self.config;
        let mut resampler =
            Resampler::new(audio.format, cfg.playback_format).map_err(ProductionEnd::SynthesisFailed)?;
        let produced = match cfg.render {
            RenderMode::Streamed => {
                self.stream_blocks(audio.stream, &mut resampler, &text, queue, cancel)
                    .await?
            }
            RenderMode::FullSentence => {
                self.sentence_blocks(audio.stream, &mut resampler, &text, queue, cancel)
                    .await?
            }
        };
        if !produced {
            warn!(chunk = %text, "synthesizer returned no audio");
        } else if cfg.inter_chunk_ms > 0 {
            let gap = cfg
                .playback_format
                .silence(Duration::from_millis(cfg.inter_chunk_ms));
            enqueue(queue, gap, &Arc::from(""), cancel).await?;
        }
        Ok(())
    }

    /// Queue audio in coalesced blocks while it is still arriving.
    async fn stream_blocks(
        &self,
        mut stream: PcmStream,
        resampler: &mut Resampler,
        text: &Arc<str>,
        queue: &mut BlockSender,
        cancel: &CancelSignal,
    ) -> Result<bool, ProductionEnd> {
        let cfg = &self.config;
        let mut coalescer = Coalescer::new(
            cfg.playback_format,
            Duration::from_millis(cfg.chunk_target_ms),
            Duration::from_millis(cfg.block_floor_ms),
            Duration::from_millis(cfg.flush_timeout_ms),
        );
        let mut produced = false;
        loop {
            let ready = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProductionEnd::Cancelled),
                _ = sleep_until(coalescer.deadline()) => coalescer.flush().into_iter().collect(),
                piece = stream.next() => match piece {
                    Some(Ok(bytes)) => {
                        let pcm = resampler.process(&bytes).map_err(ProductionEnd::SynthesisFailed)?;
                        coalescer.offer(&pcm, Instant::now())
                    }
                    Some(Err(e)) => return Err(ProductionEnd::SynthesisFailed(e)),
                    None => break,
                },
            };
            for pcm in ready {
                self.emit(queue, pcm, text, cancel).await?;
                produced = true;
            }
        }
        let tail = resampler.finish().map_err(ProductionEnd::SynthesisFailed)?;
        let mut rest = coalescer.offer(&tail, Instant::now());
        rest.extend(coalescer.flush());
        for pcm in rest {
            self.emit(queue, pcm, text, cancel).await?;
            produced = true;
        }
        Ok(produced)
    }

    /// Render the whole chunk, then queue it as one block or in slabs of
    /// `sentence_slice_ms`.
    async fn sentence_blocks(
        &self,
        mut stream: PcmStream,
        resampler: &mut Resampler,
        text: &Arc<str>,
        queue: &mut BlockSender,
        cancel: &CancelSignal,
    ) -> Result<bool, ProductionEnd> {
        let mut pcm = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProductionEnd::Cancelled),
                piece = stream.next() => match piece {
                    Some(Ok(bytes)) => {
                        pcm.extend(resampler.process(&bytes).map_err(ProductionEnd::SynthesisFailed)?);
                    }
                    Some(Err(e)) => return Err(ProductionEnd::SynthesisFailed(e)),
                    None => break,
                },
            }
        }
        pcm.extend(resampler.finish().map_err(ProductionEnd::SynthesisFailed)?);
        if pcm.is_empty() {
            return Ok(false);
        }

        let format = self.config.playback_format;
        let slab = match self.config.sentence_slice_ms {
            0 => pcm.len(),
            ms => format
                .bytes_for(Duration::from_millis(ms))
                .max(format.bytes_per_frame()),
        };
        debug!(bytes = pcm.len(), slab, "chunk rendered");
        for block in pcm.chunks(slab) {
            self.emit(queue, block.to_vec(), text, cancel).await?;
        }
        Ok(true)
    }

    async fn emit(
        &self,
        queue: &mut BlockSender,
        mut pcm: Vec<u8>,
        text: &Arc<str>,
        cancel: &CancelSignal,
    ) -> Result<(), ProductionEnd> {
        if self.config.fade_ms > 0 {
            apply_fades(
                &mut pcm,
                self.config.playback_format,
                Duration::from_millis(self.config.fade_ms),
            );
        }
        enqueue(queue, pcm, text, cancel).await
    }
}

async fn enqueue(queue: &mut BlockSender, pcm: Vec<u8>, text: &Arc<str>, cancel: &CancelSignal) -> Result<(), ProductionEnd> {
    if cancel.is_cancelled() {
        return Err(ProductionEnd::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProductionEnd::Cancelled),
        res = queue.send(pcm, text.clone()) => match res {
            Ok(seq) => {
                debug!(seq, "block enqueued");
                Ok(())
            }
            Err(_) => Err(ProductionEnd::QueueClosed),
        },
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
