// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::command::CommandSet;
use crate::commander::{CommanderRef, ListenerId};
use crate::controller::{CommandFilter, ManagerSnapshot, StorageSnapshot};
use crate::error::ManagerResult;
use crate::status::TakeAction;

/// Operation forwarded to a manager task.
#[derive(Debug)]
pub enum ManagerCommand {
    AddCommandSet(CommandSet),
    DeleteCommandSet { command_id: String },
    DeleteCommandSetByUuid(Uuid),
    /// Commander id whose sets are dropped.
    DeleteByCommander(String),
    TakeAction {
        commander: CommanderRef,
        action: TakeAction,
    },
    FindCommandStorage(CommandFilter),
    FilterCommandStorage(CommandFilter),
    AttachCommander(CommanderRef),
    DetachCommander(String),
    GetSnapshot,
}

#[derive(Debug)]
pub enum ManagerReply {
    Ack,
    Added(Uuid),
    Sets(Vec<CommandSet>),
    Storage(StorageSnapshot),
    Snapshot(Box<ManagerSnapshot>),
    Attached(ListenerId),
}

/// Request sent to the manager task.
#[derive(Debug)]
pub struct ManagerRequest {
    pub cmd: ManagerCommand,
    pub respond_to: oneshot::Sender<ManagerResult<ManagerReply>>,
}
