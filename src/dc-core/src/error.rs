// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;

/// Contract errors surfaced to callers of a manager.
///
/// Scheduling outcomes such as timeouts are never returned through this
/// type; they reach the owning commander via `on_dc_error` instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error("device not connected")]
    DeviceNotConnected,

    #[error("no command in progress")]
    NoCommandInProgress,

    #[error("commander mismatch: {0} does not own the current command set")]
    CommanderMismatch(String),

    #[error("invalid command set: {0}")]
    InvalidCommandSet(String),

    #[error("current command has no delay")]
    NoDelayOnCurrentCommand,

    #[error("manager task is not running")]
    ManagerClosed,

    #[error("unknown operation status: {0}")]
    UnknownStatus(String),

    #[error("unknown take action: {0}")]
    UnknownAction(String),
}

pub type ManagerResult<T> = Result<T, ManagerError>;
