// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Thin handle giving the listener access to one manager task and its state.

use tokio::sync::{mpsc, oneshot, watch};
use tracing::error;
use uuid::Uuid;

use dc_core::commander::ListenerId;
use dc_core::{
    CommandFilter, CommandSet, CommanderRef, ConnectionId, ManagerCommand, ManagerError,
    ManagerReply, ManagerRequest, ManagerResult, ManagerSnapshot, StorageSnapshot, TakeAction,
};

/// A handle to a single running manager.
///
/// One `ManagerHandle` is created per device connection by the
/// [`ManagerRegistry`](crate::registry::ManagerRegistry).
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    /// Device name the manager was registered under.
    pub name: String,
    pub connection: ConnectionId,
    /// Send requests to the manager task.
    pub tx: mpsc::Sender<ManagerRequest>,
    /// Latest published state for fast reads.
    pub state_rx: watch::Receiver<ManagerSnapshot>,
}

impl ManagerHandle {
    pub async fn request(&self, cmd: ManagerCommand) -> ManagerResult<ManagerReply> {
        let (respond_to, resp_rx) = oneshot::channel();
        self.tx
            .send(ManagerRequest { cmd, respond_to })
            .await
            .map_err(|_| ManagerError::ManagerClosed)?;
        resp_rx.await.map_err(|_| ManagerError::ManagerClosed)?
    }

    pub async fn add_command_set(&self, set: CommandSet) -> ManagerResult<Uuid> {
        match self.request(ManagerCommand::AddCommandSet(set)).await? {
            ManagerReply::Added(uuid) => Ok(uuid),
            other => Err(self.unexpected(other)),
        }
    }

    pub async fn delete_command_set(&self, command_id: &str) -> ManagerResult<()> {
        self.request(ManagerCommand::DeleteCommandSet {
            command_id: command_id.to_string(),
        })
        .await
        .map(drop)
    }

    pub async fn delete_command_set_by_uuid(&self, uuid: Uuid) -> ManagerResult<()> {
        self.request(ManagerCommand::DeleteCommandSetByUuid(uuid))
            .await
            .map(drop)
    }

    pub async fn delete_by_commander(&self, commander_id: &str) -> ManagerResult<()> {
        self.request(ManagerCommand::DeleteByCommander(commander_id.to_string()))
            .await
            .map(drop)
    }

    pub async fn take_action(
        &self,
        commander: CommanderRef,
        action: TakeAction,
    ) -> ManagerResult<()> {
        self.request(ManagerCommand::TakeAction { commander, action })
            .await
            .map(drop)
    }

    pub async fn find_command_storage(&self, filter: CommandFilter) -> ManagerResult<Vec<CommandSet>> {
        match self.request(ManagerCommand::FindCommandStorage(filter)).await? {
            ManagerReply::Sets(sets) => Ok(sets),
            other => Err(self.unexpected(other)),
        }
    }

    pub async fn filter_command_storage(
        &self,
        filter: CommandFilter,
    ) -> ManagerResult<StorageSnapshot> {
        match self.request(ManagerCommand::FilterCommandStorage(filter)).await? {
            ManagerReply::Storage(storage) => Ok(storage),
            other => Err(self.unexpected(other)),
        }
    }

    pub async fn attach_commander(&self, commander: CommanderRef) -> ManagerResult<ListenerId> {
        match self.request(ManagerCommand::AttachCommander(commander)).await? {
            ManagerReply::Attached(id) => Ok(id),
            other => Err(self.unexpected(other)),
        }
    }

    pub async fn detach_commander(&self, commander_id: &str) -> ManagerResult<()> {
        self.request(ManagerCommand::DetachCommander(commander_id.to_string()))
            .await
            .map(drop)
    }

    /// Last state published by the task, without a round trip.
    pub fn snapshot(&self) -> ManagerSnapshot {
        self.state_rx.borrow().clone()
    }

    fn unexpected(&self, reply: ManagerReply) -> ManagerError {
        error!("Manager {} sent unexpected reply {:?}", self.name, reply);
        ManagerError::ManagerClosed
    }
}
