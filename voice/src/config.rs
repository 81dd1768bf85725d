use serde::Deserialize;
use tts::{ChunkerConfig, RenderMode, SynthesisConfig};

/// Tunables for a [`crate::TurnController`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Preferred audio block length.
    pub chunk_target_ms: u64,
    /// Blocks buffered between synthesis and playback.
    pub queue_depth: usize,
    /// Voice handed to the synthesizer when it is built.
    pub voice: Option<String>,
    pub chunker: ChunkerConfig,
    pub block_floor_ms: u64,
    pub flush_timeout_ms: u64,
    pub inter_chunk_ms: u64,
    pub render: RenderMode,
    pub sentence_slice_ms: u64,
    pub fade_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let synthesis = SynthesisConfig::default();
        Self {
            chunk_target_ms: synthesis.chunk_target_ms,
            queue_depth: 3,
            voice: None,
            chunker: synthesis.chunker,
            block_floor_ms: synthesis.block_floor_ms,
            flush_timeout_ms: synthesis.flush_timeout_ms,
            inter_chunk_ms: synthesis.inter_chunk_ms,
            render: synthesis.render,
            sentence_slice_ms: synthesis.sentence_slice_ms,
            fade_ms: synthesis.fade_ms,
        }
    }
}

impl PipelineConfig {
    pub fn synthesis(&self) -> SynthesisConfig {
        SynthesisConfig {
            chunker: self.chunker.clone(),
            chunk_target_ms: self.chunk_target_ms,
            block_floor_ms: self.block_floor_ms,
            flush_timeout_ms: self.flush_timeout_ms,
            inter_chunk_ms: self.inter_chunk_ms,
            render: self.render,
            sentence_slice_ms: self.sentence_slice_ms,
            fade_ms: self.fade_ms,
            ..SynthesisConfig::default()
        }
    }
}
