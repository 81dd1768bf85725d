use std::fmt;
use tokio::time::Instant;

/// Latencies of one turn in milliseconds, measured from the end of the
/// question. `None` means the event never happened.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TurnMetrics {
    pub question_to_response_ms: Option<f64>,
    pub llm_ttf_ms: Option<f64>,
    pub llm_total_ms: Option<f64>,
}

impl TurnMetrics {
    pub fn from_timestamps(
        question_end: Instant,
        first_token: Option<Instant>,
        completion: Option<Instant>,
        first_play: Option<Instant>,
    ) -> Self {
        let since = |at: Option<Instant>| at.map(|t| t.saturating_duration_since(question_end).as_secs_f64() * 1000.0);
        Self {
            question_to_response_ms: since(first_play),
            llm_ttf_ms: since(first_token),
            llm_total_ms: since(completion),
        }
    }
}

struct Ms(Option<f64>);

impl fmt::Display for Ms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ms) => write!(f, "{ms:.1}"),
            None => f.write_str("unknown"),
        }
    }
}

impl fmt::Display for TurnMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QUESTION-TO-RESPONSE_MS {} LLM-TTF_MS {} LLM-TOTAL_MS {}",
            Ms(self.question_to_response_ms),
            Ms(self.llm_ttf_ms),
            Ms(self.llm_total_ms)
        )
    }
}
