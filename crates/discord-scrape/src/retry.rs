//! Bounded connect-retry loop and the session state machine it drives.
//!
//! ```text
//! Init -> Connecting(1) -> Connecting(2) -> ... -> Connected -> Extracting -> Done
//!               \________________________________________________/
//!                                      \-> Failed
//! ```

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::duration_ms;
use crate::error::ScrapeError;

/// How long to wait between connection attempts, and how many to make.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    /// Total connection attempts, including the first.
    pub max_attempts: u32,
    /// Growth factor applied per failed attempt; 1.0 keeps the delay fixed.
    pub multiplier: f64,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(2), 100)
    }
}

impl BackoffPolicy {
    pub fn fixed(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            multiplier: 1.0,
            max_delay: Duration::from_secs(30).max(base_delay),
        }
    }

    pub fn exponential(base_delay: Duration, multiplier: f64, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            multiplier,
            max_delay,
        }
    }

    /// Delay to sleep after the `attempt`-th (1-based) failure.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = (self.base_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Connecting { attempt: u32 },
    Connected,
    Extracting,
    Done,
    /// Terminal. Reached on retry exhaustion or any non-retryable error.
    Failed,
}

/// Runs a connect step under [`BackoffPolicy`], then a single extract step,
/// publishing every state transition on a watch channel.
pub struct RetryOrchestrator {
    policy: BackoffPolicy,
    state: watch::Sender<SessionState>,
}

impl RetryOrchestrator {
    pub fn new(policy: BackoffPolicy) -> Self {
        let (state, _) = watch::channel(SessionState::Init);
        Self { policy, state }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Connect (retrying handshake failures), then hand the connection to
    /// `extract` exactly once.
    pub async fn run<T, R, C, CFut, E, EFut>(&self, connect: C, extract: E) -> Result<R, ScrapeError>
    where
        C: FnMut(u32) -> CFut,
        CFut: Future<Output = Result<T, ScrapeError>>,
        E: FnOnce(T) -> EFut,
        EFut: Future<Output = Result<R, ScrapeError>>,
    {
        let connection = self.connect_with_retry(connect).await?;

        self.transition(SessionState::Extracting);
        match extract(connection).await {
            Ok(output) => {
                self.transition(SessionState::Done);
                Ok(output)
            }
            Err(e) => {
                warn!(error = %e, "Extraction failed");
                self.transition(SessionState::Failed);
                Err(e)
            }
        }
    }

    /// The `Connecting` loop on its own. `connect` receives the 1-based
    /// attempt number.
    pub async fn connect_with_retry<T, C, CFut>(&self, mut connect: C) -> Result<T, ScrapeError>
    where
        C: FnMut(u32) -> CFut,
        CFut: Future<Output = Result<T, ScrapeError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.transition(SessionState::Connecting { attempt });

            match connect(attempt).await {
                Ok(connection) => {
                    info!(attempt, "Connected to DevTools target");
                    self.transition(SessionState::Connected);
                    return Ok(connection);
                }
                Err(e) if e.is_retryable() => {
                    if attempt >= max_attempts {
                        warn!(attempt, error = %e, "Connection attempts exhausted");
                        self.transition(SessionState::Failed);
                        return Err(ScrapeError::MaxRetriesExceeded {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Connection attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Non-retryable failure while connecting");
                    self.transition(SessionState::Failed);
                    return Err(e);
                }
            }
        }
    }

    /// For failures that happen before the connect loop starts.
    pub(crate) fn mark_failed(&self) {
        self.transition(SessionState::Failed);
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        debug!(?previous, ?next, "Session state transition");
    }
}
