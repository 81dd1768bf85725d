//! Cancellable token stream for a single prompt.
//!
//! [`TokenStream::start`] spawns a task that drives an [`LLMClient`] reply and
//! forwards each non-empty text delta as [`TokenEvent::Token`]. Exactly one
//! terminal event follows: [`TokenEvent::Completed`],
//! [`TokenEvent::Cancelled`] or [`TokenEvent::Failed`]. The task records when
//! the first token and the terminal event happened in [`StreamTimings`].

use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::traits::{LLMClient, LLMError};

#[derive(Debug)]
pub enum TokenEvent {
    Token(String),
    Completed,
    Cancelled,
    Failed(LLMError),
}

impl TokenEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TokenEvent::Token(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// Timestamps written once by the stream task.
#[derive(Debug, Default)]
pub struct StreamTimings {
    first_token: OnceLock<Instant>,
    finished: OnceLock<(Instant, StreamOutcome)>,
}

impl StreamTimings {
    pub fn first_token(&self) -> Option<Instant> {
        self.first_token.get().copied()
    }

    pub fn finished(&self) -> Option<Instant> {
        self.finished.get().map(|(at, _)| *at)
    }

    /// When the reply ran to completion. Cancelled and failed replies have
    /// no completion time.
    pub fn completed(&self) -> Option<Instant> {
        match self.outcome()? {
            StreamOutcome::Completed => self.finished(),
            StreamOutcome::Cancelled | StreamOutcome::Failed => None,
        }
    }

    pub fn outcome(&self) -> Option<StreamOutcome> {
        self.finished.get().map(|(_, outcome)| *outcome)
    }
}

pub struct TokenStream {
    rx: mpsc::UnboundedReceiver<TokenEvent>,
    cancel: CancelSignal,
    timings: Arc<StreamTimings>,
    task: JoinHandle<()>,
}

impl TokenStream {
    /// Start streaming the reply to `prompt`.
    ///
    /// The returned stream stops producing tokens once `cancel` is set and
    /// then yields [`TokenEvent::Cancelled`].
    pub fn start(client: Arc<dyn LLMClient>, prompt: impl Into<String>, cancel: CancelSignal) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let timings = Arc::new(StreamTimings::default());
        let task = tokio::spawn(drive(
            client,
            prompt.into(),
            cancel.clone(),
            timings.clone(),
            tx,
        ));
        Self {
            rx,
            cancel,
            timings,
            task,
        }
    }

    /// Request that generation stop. A terminal event is still delivered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn timings(&self) -> Arc<StreamTimings> {
        self.timings.clone()
    }
}

impl Stream for TokenStream {
    type Item = TokenEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<TokenEvent>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        // A cancelled task winds down by itself and still records its end.
        if !self.cancel.is_cancelled() {
            self.task.abort();
        }
    }
}

async fn drive(
    client: Arc<dyn LLMClient>,
    prompt: String,
    cancel: CancelSignal,
    timings: Arc<StreamTimings>,
    tx: mpsc::UnboundedSender<TokenEvent>,
) {
    let started = Instant::now();
    let finish = |event: TokenEvent, outcome: StreamOutcome| {
        let _ = timings.finished.set((Instant::now(), outcome));
        let _ = tx.send(event);
    };

    debug!(backend = client.name(), "opening token stream");
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        res = client.stream_chat(&prompt) => Some(res),
    };
    let mut stream = match opened {
        None => {
            info!("token stream cancelled before the first token");
            finish(TokenEvent::Cancelled, StreamOutcome::Cancelled);
            return;
        }
        Some(Err(e)) => {
            warn!(error = %e, "token stream failed to open");
            finish(TokenEvent::Failed(e), StreamOutcome::Failed);
            return;
        }
        Some(Ok(stream)) => stream,
    };

    let mut count = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(tokens = count, "token stream cancelled");
                finish(TokenEvent::Cancelled, StreamOutcome::Cancelled);
                return;
            }
            next = stream.next() => next,
        };
        match next {
            Some(Ok(text)) if text.is_empty() => {}
            Some(Ok(text)) => {
                if timings.first_token.set(Instant::now()).is_ok() {
                    info!(
                        ttf_ms = started.elapsed().as_secs_f64() * 1000.0,
                        "first token"
                    );
                }
                count += 1;
                debug!(n = count, token = %text, "token");
                if tx.send(TokenEvent::Token(text)).is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, tokens = count, "token stream failed");
                finish(TokenEvent::Failed(e), StreamOutcome::Failed);
                return;
            }
            None => {
                info!(
                    tokens = count,
                    total_ms = started.elapsed().as_secs_f64() * 1000.0,
                    "response complete"
                );
                finish(TokenEvent::Completed, StreamOutcome::Completed);
                return;
            }
        }
    }
}
