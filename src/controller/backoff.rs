//! # Backoff
//!
//! Exponential retry delays, tracked per object so one failing resource does
//! not slow down the others.

use crate::store::ObjectKey;
use std::collections::HashMap;
use std::time::Duration;

/// `base * 2^attempt`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Same delay for every attempt
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    /// Delay before retry number `attempt` (0-indexed)
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Consecutive failure counts per object
#[derive(Debug)]
pub struct BackoffTracker {
    policy: ExponentialBackoff,
    failures: HashMap<ObjectKey, u32>,
}

impl BackoffTracker {
    #[must_use]
    pub fn new(policy: ExponentialBackoff) -> Self {
        Self {
            policy,
            failures: HashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying it
    pub fn next_delay(&mut self, key: &ObjectKey) -> Duration {
        let attempt = self.failures.entry(key.clone()).or_insert(0);
        let delay = self.policy.delay(*attempt);
        *attempt = attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    #[must_use]
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}
