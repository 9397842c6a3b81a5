//! Capture restart policy
//!
//! Restarts after a device fault wait a fixed backoff, are rate limited, and
//! give up after too many consecutive failures.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::config::RecoveryConfig;
use crate::{Error, Result};

/// Restart limiter for the capture source
type RestartLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Decides when and whether to restart a faulted source
pub struct RestartPolicy {
    backoff: Duration,
    limiter: RestartLimiter,
    clock: DefaultClock,
    max_failures: u32,
    failures: u32,
}

impl RestartPolicy {
    /// Create a policy from the recovery configuration
    #[must_use]
    pub fn new(config: &RecoveryConfig) -> Self {
        let per_minute = NonZeroU32::new(config.restarts_per_minute).unwrap_or(NonZeroU32::MIN);

        Self {
            backoff: config.restart_backoff,
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            clock: DefaultClock::default(),
            max_failures: config.max_restart_failures.max(1),
            failures: 0,
        }
    }

    /// Delay before the next restart attempt
    ///
    /// Consumes one restart from the rate limit when one is available;
    /// otherwise the backoff is extended until the limit allows another.
    pub fn next_delay(&self) -> Duration {
        match self.limiter.check() {
            Ok(()) => self.backoff,
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                tracing::warn!(
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "restart rate limit reached"
                );
                self.backoff + wait
            }
        }
    }

    /// Record a failed restart
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceFault` once consecutive failures reach the limit
    pub fn record_failure(&mut self, error: &Error) -> Result<()> {
        self.failures += 1;
        tracing::warn!(
            error = %error,
            failures = self.failures,
            max = self.max_failures,
            "capture restart failed"
        );

        if self.failures >= self.max_failures {
            return Err(Error::DeviceFault(format!(
                "capture failed to restart {} times: {error}",
                self.failures
            )));
        }
        Ok(())
    }

    /// Record that the source is delivering audio again
    pub fn record_success(&mut self) {
        if self.failures > 0 {
            tracing::info!(failures = self.failures, "capture recovered");
            self.failures = 0;
        }
    }

    /// Consecutive failed restarts so far
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }
}
