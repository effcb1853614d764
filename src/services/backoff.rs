// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Retry policy for throttled Strava requests.
//!
//! Pure decision logic: given how many throttled responses have been seen in a
//! row and the delay Strava advised (if any), return how long to wait before
//! the next attempt, or `None` to give up. The fetcher does the sleeping.

use std::time::Duration;

/// Exponential backoff with a cap and a bounded number of retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first throttled response
    pub base: Duration,
    /// Upper bound for any single delay, advised or computed
    pub max: Duration,
    /// Throttled responses tolerated before giving up
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    /// 2s, 4s, 8s, 16s, then give up.
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(60),
            max_attempts: 4,
        }
    }
}

impl BackoffPolicy {
    /// Smallest retry bound accepted from configuration.
    pub const MIN_ATTEMPTS: u32 = 3;

    /// Delay before retrying after the `attempt`-th consecutive throttle
    /// (1-based), or `None` once `attempt` exceeds `max_attempts`.
    pub fn next_delay(&self, attempt: u32, advised: Option<Duration>) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }

        let delay = advised.unwrap_or_else(|| {
            let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
            self.base.saturating_mul(factor)
        });
        Some(delay.min(self.max))
    }
}
