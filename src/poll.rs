use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::config::{POLL_ATTEMPTS, POLL_INTERVAL};
use crate::error::{DiagnosticsError, Result};

/// Outcome of a single readiness probe.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    Ready(T),
    Pending(String),
}

/// Bounded, fixed-interval retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(POLL_ATTEMPTS, POLL_INTERVAL)
    }
}

impl Poller {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Spread `timeout` into attempts of `interval` each (at least one).
    pub fn with_timeout(interval: Duration, timeout: Duration) -> Self {
        let attempts = if interval.is_zero() {
            1
        } else {
            (timeout.as_millis() / interval.as_millis()).max(1) as u32
        };
        Self::new(attempts, interval)
    }

    /// Sleep between two attempts.
    pub async fn pause(&self) {
        if !self.interval.is_zero() {
            sleep(self.interval).await;
        }
    }

    /// Run `probe` until it reports `Ready`, an error, or the attempt budget
    /// runs out. The probe receives the 1-based attempt number.
    pub async fn until<T, F, Fut>(&self, what: &str, mut probe: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<PollStatus<T>>>,
    {
        for attempt in 1..=self.attempts {
            match probe(attempt).await? {
                PollStatus::Ready(value) => return Ok(value),
                PollStatus::Pending(reason) => {
                    debug!(
                        what,
                        attempt,
                        attempts = self.attempts,
                        reason = %reason,
                        "poll_pending"
                    );
                }
            }

            if attempt < self.attempts {
                self.pause().await;
            }
        }

        Err(DiagnosticsError::Timeout {
            what: what.to_string(),
            attempts: self.attempts,
        })
    }
}
