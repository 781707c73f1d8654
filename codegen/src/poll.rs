//! Bounded, cancellable polling of a submitted generation.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::core::types::{GenerationStatus, IterationCounts};
use crate::error::SessionError;
use crate::io::config::PollConfig;
use crate::io::service::GenerationService;
use crate::io::sink::ProgressSink;

/// Suspends the poller between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by `tokio::time::sleep`.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How polling ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Complete {
        counts: IterationCounts,
        attempts: u32,
    },
    Cancelled {
        attempts: u32,
    },
}

impl PollOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Complete { attempts, .. } | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// Dependencies shared by every poll of one engine.
pub struct Poller<'a> {
    pub service: &'a dyn GenerationService,
    pub sleeper: &'a dyn Sleeper,
    pub progress: &'a dyn ProgressSink,
    pub settings: &'a PollConfig,
}

impl Poller<'_> {
    /// Poll `generation_id` until it reaches a terminal status.
    ///
    /// Cancellation is checked before every status query and raced against
    /// every sleep. No sleep follows the last attempt of the budget.
    #[instrument(skip(self, cancel), fields(max_attempts = self.settings.max_attempts))]
    pub async fn poll_until_terminal(
        &self,
        conversation_id: &str,
        generation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, SessionError> {
        let budget = self.settings.max_attempts;
        let delay = self.settings.delay();

        for attempt in 1..=budget {
            if cancel.is_cancelled() {
                debug!(attempt, "generation cancelled before status check");
                return Ok(PollOutcome::Cancelled {
                    attempts: attempt - 1,
                });
            }

            let report = self
                .service
                .generation_status(conversation_id, generation_id)
                .await
                .map_err(|err| SessionError::StatusQueryFailed {
                    message: format!("{err:#}"),
                })?;
            debug!(attempt, status = %report.status, "generation status");

            match &report.status {
                GenerationStatus::Complete => {
                    return Ok(PollOutcome::Complete {
                        counts: report.counts(),
                        attempts: attempt,
                    });
                }
                status if status.is_pending() => {
                    let message = report
                        .progress
                        .clone()
                        .unwrap_or_else(|| default_progress(status).to_string());
                    self.progress.report(&message);
                }
                GenerationStatus::Unrecognized(raw) => {
                    warn!(status = %raw, "unrecognized generation status");
                    return Err(SessionError::ProtocolError {
                        status: raw.clone(),
                    });
                }
                status => {
                    // Remaining statuses are the terminal failures.
                    let kind = status.failure_kind().ok_or_else(|| {
                        SessionError::ProtocolError {
                            status: status.to_string(),
                        }
                    })?;
                    warn!(%kind, detail = ?report.detail, "generation failed");
                    return Err(SessionError::GenerationFailed {
                        kind,
                        detail: report.detail.clone(),
                    });
                }
            }

            if attempt == budget {
                break;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(attempt, "generation cancelled while waiting");
                    return Ok(PollOutcome::Cancelled { attempts: attempt });
                }
                () = self.sleeper.sleep(delay) => {}
            }
        }

        warn!(attempts = budget, "generation polling budget exhausted");
        Err(SessionError::GenerationTimeout { attempts: budget })
    }
}

fn default_progress(status: &GenerationStatus) -> &'static str {
    match status {
        GenerationStatus::PredictReady => "Preparing the generated changes",
        _ => "Generating code",
    }
}
