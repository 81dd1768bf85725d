//! Turn-taking loop over line-based input.
//!
//! Each non-empty line is a question. A line arriving while an answer is
//! still being spoken interrupts it and is otherwise ignored; Ctrl+C does the
//! same, or ends the session when nothing is playing.

use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use voice::{TurnController, TurnOutcome, TurnReport};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub completed: usize,
    pub interrupted: usize,
    pub failed: usize,
}

impl SessionSummary {
    fn record(&mut self, report: &TurnReport) {
        match &report.outcome {
            TurnOutcome::Completed => self.completed += 1,
            TurnOutcome::Cancelled => self.interrupted += 1,
            TurnOutcome::Failed(_) => self.failed += 1,
        }
    }
}

async fn finished(turn: &mut Option<JoinHandle<TurnReport>>) -> Option<TurnReport> {
    match turn {
        Some(handle) => match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "turn task died");
                None
            }
        },
        None => std::future::pending().await,
    }
}

/// Answer questions read from `input` until it ends or Ctrl+C is pressed
/// while idle. The turn still speaking when input ends is allowed to finish.
pub async fn run_session<R>(turns: Arc<TurnController>, input: R) -> anyhow::Result<SessionSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut current: Option<JoinHandle<TurnReport>> = None;
    let mut summary = SessionSummary::default();

    loop {
        tokio::select! {
            biased;
            done = finished(&mut current) => {
                current = None;
                if let Some(report) = done {
                    debug!(id = report.id, outcome = ?report.outcome, "turn reaped");
                    summary.record(&report);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if !turns.interrupt() {
                    info!("bye");
                    break;
                }
                info!("interrupted by Ctrl+C");
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if current.is_some() {
                    if turns.interrupt() {
                        info!("barge-in");
                    }
                    continue;
                }
                let question = line.trim().to_string();
                if question.is_empty() {
                    continue;
                }
                let turns = turns.clone();
                current = Some(tokio::spawn(async move { turns.run_turn(&question).await }));
            }
        }
    }

    if let Some(handle) = current {
        match handle.await {
            Ok(report) => summary.record(&report),
            Err(e) => warn!(error = %e, "turn task died"),
        }
    }
    Ok(summary)
}
