// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-set timer side-table owned by the manager.
//!
//! Timers are plain deadlines keyed by kind and set uuid. The manager task
//! sleeps until the earliest one and hands the due entries back to the
//! manager, so a disarmed timer can never fire.

use std::collections::HashMap;

use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Waiting for a terminal response to a transmitted command.
    Execution,
    /// Pause before re-transmitting after a retry request.
    Retry,
    /// Parked set returns to its rank bucket.
    DelayReturn,
}

#[derive(Debug, Default)]
pub struct TimerTable {
    deadlines: HashMap<(TimerKind, Uuid), Instant>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) a timer.
    pub fn arm(&mut self, kind: TimerKind, uuid: Uuid, deadline: Instant) {
        self.deadlines.insert((kind, uuid), deadline);
    }

    /// Returns whether the timer was armed.
    pub fn disarm(&mut self, kind: TimerKind, uuid: Uuid) -> bool {
        self.deadlines.remove(&(kind, uuid)).is_some()
    }

    pub fn disarm_all_for(&mut self, uuid: Uuid) {
        self.deadlines.retain(|(_, id), _| *id != uuid);
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_armed(&self, kind: TimerKind, uuid: Uuid) -> bool {
        self.deadlines.contains_key(&(kind, uuid))
    }

    pub fn deadline(&self, kind: TimerKind, uuid: Uuid) -> Option<Instant> {
        self.deadlines.get(&(kind, uuid)).copied()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(TimerKind, Uuid)> {
        let mut due: Vec<(Instant, TimerKind, Uuid)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|((kind, uuid), deadline)| (*deadline, *kind, *uuid))
            .collect();
        due.sort();
        for (_, kind, uuid) in &due {
            self.deadlines.remove(&(*kind, *uuid));
        }
        due.into_iter().map(|(_, kind, uuid)| (kind, uuid)).collect()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
