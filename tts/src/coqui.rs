use async_trait::async_trait;
use reqwest::Client;
use std::io::Cursor;
use tracing::{debug, info};

use crate::engine::{Tts, TtsAudio};
use crate::{AudioFormat, Result, TTSError};

/// Frames per piece handed to the stage, so long replies start playing before
/// the whole WAV has been converted.
const PIECE_FRAMES: usize = 4096;

/// Client for a Coqui TTS server.
#[derive(Clone)]
pub struct CoquiTts {
    url: String,
    client: Client,
    speaker_id: Option<String>,
    /// Optional language code passed as the `language_id` query parameter
    language_id: Option<String>,
}

impl CoquiTts {
    /// Create a new client targeting `url` (e.g. `http://localhost:5002/api/tts`).
    ///
    /// Optional `speaker_id` selects the voice.
    pub fn new(
        url: impl Into<String>,
        speaker_id: Option<String>,
        language_id: Option<String>,
    ) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            speaker_id,
            language_id,
        }
    }
}

/// Decode a WAV file into 16-bit PCM.
pub(crate) fn decode_wav(bytes: &[u8]) -> Result<(AudioFormat, Vec<u8>)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let format = AudioFormat::new(spec.sample_rate, spec.channels).validate()?;
    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader.samples::<i16>().collect::<std::result::Result<_, _>>()?,
        (hound::SampleFormat::Int, bits @ 17..=32) => {
            let shift = bits - 16;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<std::result::Result<_, _>>()?
        }
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<std::result::Result<_, _>>()?,
        (fmt, bits) => {
            return Err(TTSError::UnsupportedFormat(format!("{fmt:?} {bits}-bit WAV")));
        }
    };
    let pcm = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    Ok((format, pcm))
}

#[async_trait]
impl Tts for CoquiTts {
    async fn synthesize(&self, text: &str) -> Result<TtsAudio> {
        info!(url = %self.url, chars = text.len(), "requesting TTS");
        let resp = self
            .client
            .get(&self.url)
            .query(&[
                ("text", text),
                ("speaker_id", self.speaker_id.as_deref().unwrap_or("p123")),
                ("style_wav", ""),
                ("language_id", self.language_id.as_deref().unwrap_or("")),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TTSError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let wav = resp.bytes().await?;
        let (format, pcm) = decode_wav(&wav)?;
        debug!(?format, bytes = pcm.len(), "decoded WAV");
        let piece = PIECE_FRAMES * format.bytes_per_frame().max(1);
        let pieces: Vec<Result<Vec<u8>>> = pcm.chunks(piece).map(|c| Ok(c.to_vec())).collect();
        Ok(TtsAudio {
            format,
            stream: Box::pin(futures::stream::iter(pieces)),
        })
    }

    fn name(&self) -> &str {
        "coqui"
    }
}
