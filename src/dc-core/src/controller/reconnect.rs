// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Reconnect pacing for a dropped transport.

use tokio::time::Instant;

use super::policies::{ExponentialBackoff, RetryPolicy};

/// Tracks when the next reconnect attempt is due.
#[derive(Debug, Clone)]
pub struct ReconnectSupervisor {
    policy: ExponentialBackoff,
    enabled: bool,
    attempt: u32,
    next_at: Option<Instant>,
}

impl ReconnectSupervisor {
    pub fn new(policy: ExponentialBackoff, enabled: bool) -> Self {
        Self {
            policy,
            enabled,
            attempt: 0,
            next_at: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(ExponentialBackoff::default_reconnect(), false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Plan the next attempt. Returns its deadline, or `None` when disabled
    /// or out of attempts. An already planned attempt is kept.
    pub fn schedule(&mut self, now: Instant) -> Option<Instant> {
        if !self.enabled {
            return None;
        }
        if self.next_at.is_some() {
            return self.next_at;
        }
        if !self.policy.should_retry(self.attempt) {
            return None;
        }
        let at = now + self.policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.next_at = Some(at);
        self.next_at
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.next_at
    }

    /// Consume the planned attempt if it is due.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.next_at {
            Some(at) if at <= now => {
                self.next_at = None;
                true
            }
            _ => false,
        }
    }

    /// Connection is back; start the backoff over.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_backoff_grows_and_resets() {
        let policy = ExponentialBackoff::new(10, Duration::from_millis(100), Duration::from_secs(1));
        let mut supervisor = ReconnectSupervisor::new(policy, true);
        let now = Instant::now();

        let first = supervisor.schedule(now).unwrap();
        assert_eq!(first, now + Duration::from_millis(100));
        // Re-scheduling keeps the pending attempt.
        assert_eq!(supervisor.schedule(now), Some(first));
        assert!(!supervisor.take_due(now));
        assert!(supervisor.take_due(first));

        let second = supervisor.schedule(first).unwrap();
        assert_eq!(second, first + Duration::from_millis(200));
        assert_eq!(supervisor.attempts(), 2);

        supervisor.reset();
        assert_eq!(supervisor.deadline(), None);
        assert_eq!(supervisor.attempts(), 0);
    }

    #[test]
    fn test_disabled_never_schedules() {
        let mut supervisor = ReconnectSupervisor::disabled();
        assert_eq!(supervisor.schedule(Instant::now()), None);
    }

    #[test]
    fn test_gives_up_after_budget() {
        let policy = ExponentialBackoff::new(1, Duration::from_millis(10), Duration::from_millis(10));
        let mut supervisor = ReconnectSupervisor::new(policy, true);
        let now = Instant::now();
        let at = supervisor.schedule(now).unwrap();
        assert!(supervisor.take_due(at));
        assert_eq!(supervisor.schedule(at), None);
    }
}
