// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device command controller components.
//!
//! The queue holds command sets, the manager drives them against one
//! transport, and the policies pace retries and reconnects.

pub mod filter;
pub mod manager;
pub mod policies;
pub mod queue;
pub mod reconnect;
pub mod timers;

pub use filter::{CommandFilter, RankBucketSnapshot, StorageSnapshot};
pub use manager::{Manager, ManagerConfig, ManagerSnapshot};
pub use policies::{ExponentialBackoff, FixedDelay, RetryPolicy};
pub use queue::{Advance, CommandQueue, Deletion, RankBucket};
pub use reconnect::ReconnectSupervisor;
pub use timers::{TimerKind, TimerTable};
