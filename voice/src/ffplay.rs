//! Playback through an `ffplay` child process reading raw PCM from stdin.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};
use tts::AudioFormat;

use crate::device::{AudioDevice, AudioSink, PlaybackError};

/// Silence written right after start so the first real block is not clipped.
const PRIME: Duration = Duration::from_millis(25);

#[derive(Clone, Debug)]
pub struct FfplayDevice {
    program: String,
}

impl Default for FfplayDevice {
    fn default() -> Self {
        Self::new("ffplay")
    }
}

impl FfplayDevice {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(format: AudioFormat) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "warning",
            "-nostats",
            "-nodisp",
            "-autoexit",
            "-fflags",
            "nobuffer",
            "-flags",
            "low_delay",
            "-probesize",
            "32",
            "-analyzeduration",
            "0",
            "-blocksize",
            "4096",
            "-max_delay",
            "0",
            "-sync",
            "audio",
            "-f",
            "s16le",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.extend([
            "-ar".to_string(),
            format.sample_rate.to_string(),
            "-ac".to_string(),
            format.channels.to_string(),
            "-af".to_string(),
            "aresample=async=1:min_hard_comp=0.100:first_pts=0".to_string(),
            "-i".to_string(),
            "-".to_string(),
        ]);
        args
    }
}

struct FfplaySink {
    child: Child,
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl AudioDevice for FfplayDevice {
    async fn open(&self, format: AudioFormat) -> Result<Box<dyn AudioSink>, PlaybackError> {
        let mut child = Command::new(&self.program)
            .args(Self::args(format))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlaybackError::Open(format!("{}: {e}", self.program)))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PlaybackError::Open("ffplay stdin unavailable".into()))?;
        stdin.write_all(&format.silence(PRIME)).await?;
        info!(pid = child.id(), ?format, "ffplay started");
        Ok(Box::new(FfplaySink {
            child,
            stdin: Some(stdin),
        }))
    }

    fn name(&self) -> &str {
        "ffplay"
    }
}

#[async_trait]
impl AudioSink for FfplaySink {
    async fn play(&mut self, pcm: &[u8]) -> Result<(), PlaybackError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PlaybackError::Exited("closed stdin".into()))?;
        stdin.write_all(pcm).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), PlaybackError> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().await?;
        }
        let status = self.child.wait().await?;
        debug!(%status, "ffplay exited");
        if status.success() {
            Ok(())
        } else {
            Err(PlaybackError::Exited(status.to_string()))
        }
    }

    async fn abort(&mut self) {
        self.stdin = None;
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "failed to stop ffplay");
        }
    }
}
