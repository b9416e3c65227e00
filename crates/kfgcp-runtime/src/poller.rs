//! Backoff poller for long-running provider operations.
//!
//! An operation is driven through `Submitted -> Polling -> Done | Failed`.
//! Every poll error and every not-yet-done status is retried after an
//! exponentially growing, jittered delay. There is no attempt cap; waiting is
//! bounded only by the configured deadline or by the caller dropping the
//! future, which leaves the provider operation running.

use kfgcp_core::{ErrorKind, Operation, PollerConfig};
use kfgcp_provider::ProviderError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Why an operation could not be waited to success.
#[derive(Debug, Clone, Error)]
pub enum PollError {
    /// The operation finished with a provider error code.
    #[error("operation '{operation}' failed with code {code}: {message}")]
    Terminal {
        operation: String,
        code: u16,
        message: String,
    },

    #[error("operation '{operation}' not done after {attempts} polls, deadline of {deadline:?} exceeded")]
    DeadlineExceeded {
        operation: String,
        attempts: u32,
        deadline: Duration,
    },
}

impl PollError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PollError::Terminal { .. } => ErrorKind::TerminalProvider,
            PollError::DeadlineExceeded { .. } => ErrorKind::Cancelled,
        }
    }

    /// Provider code of a terminal failure.
    pub fn code(&self) -> Option<u16> {
        match self {
            PollError::Terminal { code, .. } => Some(*code),
            PollError::DeadlineExceeded { .. } => None,
        }
    }
}

enum PollState {
    Submitted,
    Polling,
    Done(Operation),
    Failed(PollError),
}

/// Randomized exponential delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
    randomization_factor: f64,
}

impl Backoff {
    pub fn new(config: &PollerConfig) -> Self {
        Self {
            current: config.initial_interval(),
            max: config.max_interval(),
            multiplier: config.multiplier.max(1.0),
            randomization_factor: config.randomization_factor.clamp(0.0, 1.0),
        }
    }

    /// Next delay: the current interval spread by the randomization factor.
    /// The interval then grows by the multiplier, capped at the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current.as_secs_f64();
        let delta = base * self.randomization_factor;
        let delay = if delta > 0.0 {
            rand::rng().random_range((base - delta)..=(base + delta))
        } else {
            base
        };

        let grown = (base * self.multiplier).min(self.max.as_secs_f64());
        self.current = Duration::from_secs_f64(grown);
        Duration::from_secs_f64(delay.max(0.0))
    }
}

/// Waits for provider operations.
#[derive(Debug, Clone)]
pub struct Poller {
    config: PollerConfig,
}

impl Poller {
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    /// Poll `operation` until it is DONE.
    ///
    /// `poll` receives the operation name to query. The name used is always
    /// the one from the latest response, since the provider may rename an
    /// operation while it runs. `label` identifies the caller in logs.
    pub async fn wait<F, Fut>(&self, label: &str, operation: &str, mut poll: F) -> Result<Operation, PollError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<Operation, ProviderError>>,
    {
        let started = Instant::now();
        let deadline = self.config.deadline();
        let mut backoff = Backoff::new(&self.config);
        let mut current = operation.to_string();
        let mut attempts: u32 = 0;
        let mut state = PollState::Submitted;

        loop {
            state = match state {
                PollState::Submitted => {
                    debug!(label, operation = %current, "Waiting for operation");
                    PollState::Polling
                }
                PollState::Polling => {
                    attempts += 1;
                    match poll(current.clone()).await {
                        Ok(op) => {
                            if op.name != current {
                                info!(label, from = %current, to = %op.name, "Operation renamed by provider");
                                current = op.name.clone();
                            }
                            if let Some(failure) = op.failure() {
                                error!(
                                    label,
                                    operation = %current,
                                    code = failure.http_code,
                                    message = %failure.message,
                                    "Operation failed"
                                );
                                PollState::Failed(PollError::Terminal {
                                    operation: current.clone(),
                                    code: failure.http_code,
                                    message: failure.message.clone(),
                                })
                            } else if op.is_done() {
                                info!(label, operation = %current, attempts, "Operation done");
                                PollState::Done(op)
                            } else {
                                info!(label, operation = %current, status = %op.status, attempts, "Operation not done yet");
                                PollState::Polling
                            }
                        }
                        Err(e) => {
                            warn!(label, operation = %current, attempts, error = %e, "Polling operation failed, retrying");
                            PollState::Polling
                        }
                    }
                }
                PollState::Done(op) => return Ok(op),
                PollState::Failed(e) => return Err(e),
            };

            if matches!(state, PollState::Polling) && attempts > 0 {
                let delay = backoff.next_delay();
                if let Some(limit) = deadline {
                    if started.elapsed() + delay > limit {
                        return Err(PollError::DeadlineExceeded {
                            operation: current,
                            attempts,
                            deadline: limit,
                        });
                    }
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}
