//! Cutting streamed text into speakable chunks.

use emojito::find_emoji;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?]+["'”’)\]]*\s"#).expect("sentence pattern"));
static CLAUSE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,;:]\s").expect("clause pattern"));
static EMPHASIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)\*+|`+|~~|\b_+|_+\b|^#+\s*").expect("emphasis pattern"));
static SPACE_BEFORE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+([,.;:!?])").expect("punctuation pattern"));

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Longest chunk sent to the synthesizer, in characters.
    pub max_chars: usize,
    /// A clause boundary only splits once the chunk is at least this long.
    pub min_clause_chars: usize,
    /// Dispatch pending text after the token stream has been quiet this long.
    /// Zero disables the idle flush.
    pub idle_flush_ms: u64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 200,
            min_clause_chars: 60,
            idle_flush_ms: 400,
        }
    }
}

/// Clean up a chunk for synthesis.
///
/// Emojis and Markdown emphasis are removed, whitespace is collapsed and
/// spaces in front of punctuation are dropped. Returns `None` when nothing
/// speakable is left.
pub fn normalize_chunk(raw: &str) -> Option<String> {
    let mut text = raw.to_string();
    for e in find_emoji(raw) {
        text = text.replace(e.glyph, "");
    }
    let text = EMPHASIS.replace_all(&text, "");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let text = SPACE_BEFORE_PUNCT.replace_all(&text, "$1").into_owned();
    if text.chars().any(char::is_alphanumeric) {
        Some(text)
    } else {
        None
    }
}

/// Accumulates tokens and releases normalized chunks at boundaries.
pub struct ChunkBuffer {
    config: ChunkerConfig,
    pending: String,
    since: Option<Instant>,
}

impl ChunkBuffer {
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            pending: String::new(),
            since: None,
        }
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Append a token and return every chunk that became complete.
    pub fn push(&mut self, token: &str, now: Instant) -> Vec<String> {
        if self.pending.trim().is_empty() {
            self.since = Some(now);
        }
        self.pending.push_str(token);
        let mut out = Vec::new();
        while let Some(end) = self.split_point() {
            self.take(end, &mut out);
            self.since = Some(now);
        }
        self.settle();
        out
    }

    /// When the idle flush is due, if text is pending.
    pub fn deadline(&self) -> Option<Instant> {
        if self.config.idle_flush_ms == 0 {
            return None;
        }
        self.since
            .map(|s| s + Duration::from_millis(self.config.idle_flush_ms))
    }

    /// Release what can be spoken after the stream went quiet.
    ///
    /// Text ending in sentence punctuation goes out whole, otherwise up to the
    /// last whitespace. A single unfinished word stays and the timer re-arms.
    pub fn flush_idle(&mut self, now: Instant) -> Vec<String> {
        let mut out = Vec::new();
        let trimmed = self.pending.trim_end();
        let end = if trimmed.ends_with(['.', '!', '?']) {
            Some(self.pending.len())
        } else {
            trimmed.rfind(char::is_whitespace).filter(|i| *i > 0)
        };
        if let Some(end) = end {
            self.take(end, &mut out);
        }
        self.settle();
        if !self.pending.is_empty() {
            self.since = Some(now);
        }
        out
    }

    /// Release everything left at the end of the reply.
    pub fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        let end = self.pending.len();
        self.take(end, &mut out);
        self.settle();
        out
    }

    fn take(&mut self, end: usize, out: &mut Vec<String>) {
        let raw: String = self.pending.drain(..end).collect();
        if let Some(chunk) = normalize_chunk(&raw) {
            out.push(chunk);
        }
    }

    fn settle(&mut self) {
        if self.pending.trim().is_empty() {
            self.pending.clear();
            self.since = None;
        }
    }

    fn split_point(&self) -> Option<usize> {
        let text = self.pending.as_str();
        let sentence = SENTENCE_END.find(text).map(|m| m.end());
        let clause = CLAUSE_END
            .find_iter(text)
            .map(|m| m.end())
            .find(|end| text[..*end].trim().chars().count() >= self.config.min_clause_chars);
        let boundary = match (sentence, clause) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let Some(end) = boundary {
            if text[..end].chars().count() <= self.config.max_chars {
                return Some(end);
            }
        }
        self.size_cut()
    }

    fn size_cut(&self) -> Option<usize> {
        let max = self.config.max_chars.max(1);
        let (limit, _) = self.pending.char_indices().nth(max)?;
        let head = &self.pending[..limit];
        match head.rfind(char::is_whitespace) {
            Some(i) if i > 0 => Some(i),
            _ => Some(limit),
        }
    }
}
