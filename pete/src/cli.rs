use anyhow::Context;
use clap::{Parser, ValueEnum};
use llm::{BackendConfig, BackendKind, client_from_config};
use std::path::PathBuf;
use std::sync::Arc;
use tts::{CoquiTts, RenderMode, SpeechApiTts, Tts};
use voice::{AudioDevice, FfplayDevice, NullDevice, PipelineConfig, TurnController};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TtsEngine {
    /// Coqui TTS server returning WAV
    Coqui,
    /// OpenAI-compatible `/v1/audio/speech` (Kokoro and friends)
    Speech,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DeviceKind {
    Ffplay,
    /// Discard audio (timing runs)
    Null,
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Ask questions, hear answers. Type while it talks to interrupt.")]
pub struct Cli {
    /// Language model backend; defaults to `LLM_BACKEND` or ollama
    #[arg(long)]
    pub backend: Option<BackendKind>,
    /// Backend base URL; defaults to `OLLAMA_URL` / `OPENAI_BASE_URL`
    #[arg(long)]
    pub llm_url: Option<String>,
    /// Model name; defaults to `OLLAMA_MODEL` / `OPENAI_MODEL`
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long, env = "TTS_ENGINE", value_enum, default_value = "coqui")]
    pub tts: TtsEngine,
    /// Synthesizer URL (Coqui endpoint or speech API base)
    #[arg(long, env = "TTS_URL")]
    pub tts_url: Option<String>,
    #[arg(long, env = "TTS_VOICE")]
    pub voice: Option<String>,
    #[arg(long, env = "TTS_MODEL", default_value = "kokoro")]
    pub tts_model: String,
    #[arg(long, env = "TTS_LANGUAGE")]
    pub language: Option<String>,

    #[arg(long, env = "AUDIO_DEVICE", value_enum, default_value = "ffplay")]
    pub device: DeviceKind,
    #[arg(long, env = "FFPLAY", default_value = "ffplay")]
    pub ffplay: String,

    /// JSON pipeline configuration
    #[arg(long, env = "PIPELINE_CONFIG")]
    pub config: Option<PathBuf>,
    #[arg(long, env = "QUEUE_DEPTH")]
    pub queue_depth: Option<usize>,
    #[arg(long, env = "CHUNK_TARGET_MS")]
    pub chunk_ms: Option<u64>,
    /// Render each sentence whole, optionally queued in slabs of this many ms
    #[arg(long, env = "SENTENCE_SLICE_MS", num_args = 0..=1, default_missing_value = "0")]
    pub full_sentence: Option<u64>,
    /// Fade each audio block in and out over this many ms
    #[arg(long, env = "FADE_MS")]
    pub fade_ms: Option<u64>,

    /// Skip loading the model before the first question
    #[arg(long)]
    pub no_prewarm: bool,
}

impl Cli {
    pub fn backend_config(&self) -> anyhow::Result<BackendConfig> {
        let mut config = match self.backend {
            Some(kind) => BackendConfig::from_env_for(kind),
            None => BackendConfig::from_env()?,
        };
        if let Some(url) = &self.llm_url {
            config.url = Some(url.clone());
        }
        if let Some(model) = &self.model {
            config.model = Some(model.clone());
        }
        Ok(config)
    }

    pub fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
            }
            None => PipelineConfig::default(),
        };
        if let Some(depth) = self.queue_depth {
            config.queue_depth = depth;
        }
        if let Some(ms) = self.chunk_ms {
            config.chunk_target_ms = ms;
        }
        if let Some(slice) = self.full_sentence {
            config.render = RenderMode::FullSentence;
            config.sentence_slice_ms = slice;
        }
        if let Some(ms) = self.fade_ms {
            config.fade_ms = ms;
        }
        if self.voice.is_some() {
            config.voice = self.voice.clone();
        }
        Ok(config)
    }

    pub fn synthesizer(&self, config: &PipelineConfig) -> Arc<dyn Tts> {
        match self.tts {
            TtsEngine::Coqui => Arc::new(CoquiTts::new(
                self.tts_url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:5002/api/tts".into()),
                config.voice.clone(),
                self.language.clone(),
            )),
            TtsEngine::Speech => Arc::new(SpeechApiTts::new(
                self.tts_url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:8880".into()),
                self.tts_model.clone(),
                config.voice.clone().unwrap_or_else(|| "af_heart".into()),
            )),
        }
    }

    pub fn audio_device(&self) -> Arc<dyn AudioDevice> {
        match self.device {
            DeviceKind::Ffplay => Arc::new(FfplayDevice::new(self.ffplay.clone())),
            DeviceKind::Null => Arc::new(NullDevice::paced()),
        }
    }

    pub fn build_controller(&self) -> anyhow::Result<TurnController> {
        let backend = self.backend_config()?;
        let llm = client_from_config(&backend).context("configuring language model")?;
        let config = self.pipeline_config()?;
        let tts = self.synthesizer(&config);
        Ok(TurnController::new(llm, tts, self.audio_device(), config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_pipeline_defaults() {
        let cli = Cli::try_parse_from([
            "pete",
            "--queue-depth",
            "6",
            "--chunk-ms",
            "300",
            "--voice",
            "p225",
        ])
        .unwrap();
        let config = cli.pipeline_config().unwrap();
        assert_eq!(config.queue_depth, 6);
        assert_eq!(config.chunk_target_ms, 300);
        assert_eq!(config.voice.as_deref(), Some("p225"));
        assert_eq!(config.render, RenderMode::Streamed);
    }

    #[test]
    fn full_sentence_flag_selects_render_mode() {
        let cli = Cli::try_parse_from(["pete", "--full-sentence", "400", "--fade-ms", "6"]).unwrap();
        let config = cli.pipeline_config().unwrap();
        assert_eq!(config.render, RenderMode::FullSentence);
        assert_eq!(config.sentence_slice_ms, 400);
        assert_eq!(config.fade_ms, 6);

        let cli = Cli::try_parse_from(["pete", "--full-sentence"]).unwrap();
        let config = cli.pipeline_config().unwrap();
        assert_eq!(config.render, RenderMode::FullSentence);
        assert_eq!(config.sentence_slice_ms, 0);
    }

    #[test]
    fn backend_flags_pick_client() {
        let cli = Cli::try_parse_from([
            "pete",
            "--backend",
            "openai",
            "--llm-url",
            "http://localhost:8080",
            "--model",
            "local",
        ])
        .unwrap();
        let config = cli.backend_config().unwrap();
        assert_eq!(config.kind, BackendKind::OpenAi);
        assert_eq!(config.url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.model.as_deref(), Some("local"));
    }

    #[test]
    fn unknown_engine_is_rejected() {
        assert!(Cli::try_parse_from(["pete", "--tts", "festival"]).is_err());
    }
}
