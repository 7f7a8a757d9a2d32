// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Retry and reconnect policies.
//!
//! The manager consults a [`RetryPolicy`] for the per-command retry budget
//! and the pause before re-transmission; the manager task uses another one
//! to pace reconnect attempts after the device drops.

use std::time::Duration;

/// Policy for retrying failed operations.
pub trait RetryPolicy: Send + Sync {
    /// Determine if another attempt is allowed after `attempt` failures.
    fn should_retry(&self, attempt: u32) -> bool;

    /// Get the delay before the next attempt.
    fn delay(&self, attempt: u32) -> Duration;

    /// Get the maximum number of attempts allowed.
    fn max_attempts(&self) -> u32;
}

/// Exponential backoff retry policy.
///
/// Delays increase exponentially with each attempt, up to a configured
/// maximum delay.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Unbounded reconnect pacing: 1s doubling up to 20s.
    pub fn default_reconnect() -> Self {
        Self {
            max_attempts: u32::MAX,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(20),
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::default_reconnect()
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        let delay = self.base_delay.saturating_mul(multiplier);
        delay.min(self.max_delay)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Fixed delay retry policy.
///
/// Uses a constant delay between attempts.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    max_attempts: u32,
    delay: Duration,
}

impl FixedDelay {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Three attempts per command, 30ms apart.
    pub fn default_command() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(30),
        }
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::default_command()
    }
}

impl RetryPolicy for FixedDelay {
    fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
