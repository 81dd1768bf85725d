//! Converting synthesizer audio into playback blocks.

use rubato::{FftFixedIn, Resampler as _};
use std::time::Duration;
use tokio::time::Instant;

use crate::{AudioFormat, Result, TTSError};

/// Input frames per FFT pass.
const FFT_CHUNK: usize = 1024;

/// Converts 16-bit PCM between formats.
///
/// Audio goes through a mono mix, so stereo input is downmixed before being
/// spread over the output channels. Rate changes run through an FFT
/// resampler. Partial frames and resampler state carry over between calls,
/// so one instance must be fed all pieces of a single stream in order and
/// then [`Resampler::finish`]ed.
pub struct Resampler {
    from: AudioFormat,
    to: AudioFormat,
    carry: Vec<u8>,
    fft: Option<FftStage>,
}

struct FftStage {
    inner: FftFixedIn<f32>,
    ratio: f64,
    pending: Vec<f32>,
    /// Leading output frames that are resampler delay.
    skip: usize,
    frames_in: u64,
    frames_out: u64,
}

impl FftStage {
    fn new(from: u32, to: u32) -> Result<Self> {
        let inner = FftFixedIn::<f32>::new(from as usize, to as usize, FFT_CHUNK, 2, 1)
            .map_err(|e| TTSError::Resample(e.to_string()))?;
        Ok(Self {
            skip: inner.output_delay(),
            inner,
            ratio: to as f64 / from as f64,
            pending: Vec::new(),
            frames_in: 0,
            frames_out: 0,
        })
    }

    fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        self.frames_in += samples.len() as u64;
        let mut out = Vec::new();
        loop {
            let need = self.inner.input_frames_next();
            if self.pending.len() < need {
                return Ok(out);
            }
            let res = self
                .inner
                .process(&[&self.pending[..need]], None)
                .map_err(|e| TTSError::Resample(e.to_string()))?;
            self.pending.drain(..need);
            self.keep(res, &mut out);
        }
    }

    /// Push out the buffered tail and trim to the exact output length.
    fn finish(&mut self) -> Result<Vec<f32>> {
        let expected = (self.frames_in as f64 * self.ratio).ceil() as u64;
        let mut out = Vec::new();
        if !self.pending.is_empty() {
            let res = self
                .inner
                .process_partial(Some(&[&self.pending[..]]), None)
                .map_err(|e| TTSError::Resample(e.to_string()))?;
            self.pending.clear();
            self.keep(res, &mut out);
        }
        while self.frames_out < expected {
            let res = self
                .inner
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(|e| TTSError::Resample(e.to_string()))?;
            if res.first().map_or(true, Vec::is_empty) {
                break;
            }
            self.keep(res, &mut out);
        }
        if self.frames_out > expected {
            let extra = (self.frames_out - expected) as usize;
            out.truncate(out.len().saturating_sub(extra));
            self.frames_out = expected;
        }
        Ok(out)
    }

    fn keep(&mut self, res: Vec<Vec<f32>>, out: &mut Vec<f32>) {
        let Some(channel) = res.into_iter().next() else {
            return;
        };
        let drop = self.skip.min(channel.len());
        self.skip -= drop;
        self.frames_out += (channel.len() - drop) as u64;
        out.extend_from_slice(&channel[drop..]);
    }
}

impl Resampler {
    pub fn new(from: AudioFormat, to: AudioFormat) -> Result<Self> {
        let from = from.validate()?;
        let to = to.validate()?;
        let fft = if from.sample_rate != to.sample_rate {
            Some(FftStage::new(from.sample_rate, to.sample_rate)?)
        } else {
            None
        };
        Ok(Self {
            from,
            to,
            carry: Vec::new(),
            fft,
        })
    }

    pub fn process(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        self.carry.extend_from_slice(input);
        let frame = self.from.bytes_per_frame();
        let usable = self.carry.len() - self.carry.len() % frame;
        let bytes: Vec<u8> = self.carry.drain(..usable).collect();
        if self.from == self.to {
            return Ok(bytes);
        }

        let channels = self.from.channels as f32;
        let mono: Vec<f32> = bytes
            .chunks_exact(frame)
            .map(|f| {
                f.chunks_exact(2)
                    .map(|s| i16::from_le_bytes([s[0], s[1]]) as f32 / 32_768.0)
                    .sum::<f32>()
                    / channels
            })
            .collect();
        let resampled = match &mut self.fft {
            Some(fft) => fft.push(&mono)?,
            None => mono,
        };
        Ok(self.spread(&resampled))
    }

    /// Emit what the resampler still holds. A dangling partial frame is
    /// dropped.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        self.carry.clear();
        let tail = match &mut self.fft {
            Some(fft) => fft.finish()?,
            None => return Ok(Vec::new()),
        };
        Ok(self.spread(&tail))
    }

    fn spread(&self, mono: &[f32]) -> Vec<u8> {
        let channels = self.to.channels as usize;
        let mut out = Vec::with_capacity(mono.len() * channels * 2);
        for value in mono {
            let sample = (value * 32_768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            for _ in 0..channels {
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
        out
    }
}

/// Ramp the first and last `fade` of a block in and out.
///
/// Blocks shorter than two fades are left alone.
pub fn apply_fades(pcm: &mut [u8], format: AudioFormat, fade: Duration) {
    let frame = format.bytes_per_frame();
    if frame == 0 {
        return;
    }
    let frames = pcm.len() / frame;
    let len = (format.sample_rate as f64 * fade.as_secs_f64()) as usize;
    if len == 0 || frames <= len * 2 {
        return;
    }
    let mut scale = |index: usize, gain: f32| {
        let start = index * frame;
        for s in pcm[start..start + frame].chunks_exact_mut(2) {
            let v = i16::from_le_bytes([s[0], s[1]]) as f32 * gain;
            s.copy_from_slice(&(v as i16).to_le_bytes());
        }
    };
    for i in 0..len {
        scale(i, i as f32 / len as f32);
        scale(frames - len + i, (len - 1 - i) as f32 / len as f32);
    }
}

/// Groups converted audio into blocks of roughly equal length.
pub struct Coalescer {
    frame: usize,
    target_bytes: usize,
    floor_bytes: usize,
    flush_timeout: Duration,
    pending: Vec<u8>,
    since: Option<Instant>,
}

impl Coalescer {
    pub fn new(format: AudioFormat, target: Duration, floor: Duration, flush_timeout: Duration) -> Self {
        let frame = format.bytes_per_frame().max(1);
        Self {
            frame,
            target_bytes: format.bytes_for(target).max(frame),
            floor_bytes: format.bytes_for(floor),
            flush_timeout,
            pending: Vec::new(),
            since: None,
        }
    }

    /// Add audio and return the blocks that are ready.
    ///
    /// Full target-sized blocks are released immediately. A shorter block
    /// leaves once it has waited `flush_timeout` and holds at least the floor.
    pub fn offer(&mut self, pcm: &[u8], now: Instant) -> Vec<Vec<u8>> {
        if pcm.is_empty() && self.pending.is_empty() {
            return Vec::new();
        }
        if self.since.is_none() {
            self.since = Some(now);
        }
        self.pending.extend_from_slice(pcm);
        let mut out = Vec::new();
        while self.pending.len() >= self.target_bytes {
            let rest = self.pending.split_off(self.target_bytes);
            out.push(std::mem::replace(&mut self.pending, rest));
            self.since = Some(now);
        }
        if self.deadline().is_some_and(|d| now >= d) {
            out.extend(self.flush());
        }
        if self.pending.is_empty() {
            self.since = None;
        }
        out
    }

    /// When the pending audio may be released early.
    pub fn deadline(&self) -> Option<Instant> {
        if self.pending.is_empty() || self.pending.len() < self.floor_bytes {
            return None;
        }
        self.since.map(|s| s + self.flush_timeout)
    }

    /// Release whatever is pending, trimmed to whole frames.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        self.since = None;
        let whole = self.pending.len() - self.pending.len() % self.frame;
        let mut block: Vec<u8> = std::mem::take(&mut self.pending);
        block.truncate(whole);
        if block.is_empty() {
            None
        } else {
            Some(block)
        }
    }
}
