// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Per-connection command scheduler.
//!
//! The manager owns one transport and one [`CommandQueue`] and drives the
//! current command set through its statuses, one command at a time. All
//! entry points end in [`Manager::manage_processing_command`], which steps
//! the state machine until it has to wait for the device, a timer or the
//! commander.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command::{Command, CommandSet};
use crate::commander::{CommanderRef, DcErrorInfo, DeviceEventEmitter, ListenerId};
use crate::error::{ManagerError, ManagerResult};
use crate::status::{DeviceEvent, MessageCode, OperationStatus, TakeAction};
use crate::transport::{ConnectionId, Transport, TransportEvent};
use crate::DynResult;

use super::filter::{CommandFilter, StorageSnapshot};
use super::policies::{FixedDelay, RetryPolicy};
use super::queue::{Advance, CommandQueue, Deletion};
use super::timers::{TimerKind, TimerTable};

/// Tunables for one manager.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Per-command retry budget and pause before re-transmission.
    pub retry: FixedDelay,
    /// Route plain timeouts through the retry budget.
    pub retry_on_timeout: bool,
}

/// Observable state of a manager.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub connection: ConnectionId,
    pub connected: bool,
    pub has_perform_command: bool,
    pub holding: bool,
    pub storage: StorageSnapshot,
}

impl ManagerSnapshot {
    /// State published before the manager has run.
    pub fn offline(connection: ConnectionId) -> Self {
        Self {
            connection,
            connected: false,
            has_perform_command: false,
            holding: false,
            storage: StorageSnapshot::default(),
        }
    }
}

enum Flow {
    Continue,
    Idle,
}

pub struct Manager {
    connection: ConnectionId,
    spreader: String,
    transport: Box<dyn Transport>,
    queue: CommandQueue,
    timers: TimerTable,
    config: ManagerConfig,
    emitter: DeviceEventEmitter,
    retry_attempts: u32,
    has_perform_command: bool,
    /// A one-and-one set finished its list and holds the channel.
    holding: bool,
    /// Error of the current command, carried into the terminate message.
    last_error: Option<DcErrorInfo>,
    /// Sets that already received their start message.
    started: HashSet<Uuid>,
}

impl Manager {
    pub fn new(transport: Box<dyn Transport>, config: ManagerConfig) -> Self {
        let connection = transport.connection_id().clone();
        Self {
            spreader: connection.to_string(),
            connection,
            transport,
            queue: CommandQueue::new(),
            timers: TimerTable::new(),
            config,
            emitter: DeviceEventEmitter::new(),
            retry_attempts: 0,
            has_perform_command: false,
            holding: false,
            last_error: None,
            started: HashSet::new(),
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn has_perform_command(&self) -> bool {
        self.has_perform_command
    }

    pub fn is_holding(&self) -> bool {
        self.holding
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn timers(&self) -> &TimerTable {
        &self.timers
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub async fn connect(&mut self) -> DynResult<()> {
        self.transport.connect().await
    }

    /// Disconnect the transport and discard all queued work.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.transport.disconnect().await {
            warn!("Disconnect of {} failed: {}", self.spreader, e);
        }
        self.wipe();
    }

    pub fn attach_commander(&mut self, commander: CommanderRef) -> ListenerId {
        self.emitter.register(commander)
    }

    pub fn detach_commander(&mut self, commander_id: &str) {
        self.emitter.unregister_commander(commander_id);
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            connection: self.connection.clone(),
            connected: self.transport.is_connected(),
            has_perform_command: self.has_perform_command,
            holding: self.holding,
            storage: self.queue.filter_command_storage(&CommandFilter::default()),
        }
    }

    pub fn find_command_storage(&self, filter: &CommandFilter) -> Vec<CommandSet> {
        self.queue.find_command_storage(filter)
    }

    pub fn filter_command_storage(&self, filter: &CommandFilter) -> StorageSnapshot {
        self.queue.filter_command_storage(filter)
    }

    /// Enqueue a set and kick the scheduler.
    pub async fn add_command_set(&mut self, set: CommandSet) -> ManagerResult<Uuid> {
        if !self.transport.is_connected() {
            return Err(ManagerError::DeviceNotConnected);
        }
        set.validate()?;
        let uuid = set.uuid;
        debug!(
            "Queued command set {} (rank {}, {} commands) on {}",
            set.label(),
            set.rank,
            set.cmd_list.len(),
            self.spreader
        );
        self.queue.add_command_set(set);
        self.manage_processing_command().await;
        Ok(uuid)
    }

    /// Delete by command id. Unknown ids are ignored.
    pub async fn delete_command_set(&mut self, command_id: &str) {
        let deletion = self.queue.delete_command_set(Some(command_id));
        self.finish_deletion(deletion).await;
    }

    pub async fn delete_command_set_by_uuid(&mut self, uuid: Uuid) {
        let deletion = self.queue.delete_command_set_by_uuid(uuid);
        self.finish_deletion(deletion).await;
    }

    /// Drop every set owned by `commander_id`, e.g. when its client leaves.
    pub async fn delete_by_commander(&mut self, commander_id: &str) {
        let filter = CommandFilter::new().commander(commander_id);
        let deletion = self.queue.delete_matching(&filter);
        if !deletion.removed.is_empty() || deletion.current_marked {
            info!(
                "Removing {} waiting command set(s) of departed commander {}",
                deletion.removed.len(),
                commander_id
            );
        }
        self.finish_deletion(deletion).await;
    }

    async fn finish_deletion(&mut self, deletion: Deletion) {
        for set in &deletion.removed {
            self.timers.disarm_all_for(set.uuid);
            self.started.remove(&set.uuid);
            info!("Deleted waiting command set {}", set.label());
            notify_message(set, MessageCode::CommandSetDelete, None, &self.spreader);
        }
        if deletion.current_marked {
            debug!("Current command set marked for deletion");
        }
        self.manage_processing_command().await;
    }

    /// Apply the commander's verdict to the current set.
    pub async fn request_take_action(
        &mut self,
        commander: &CommanderRef,
        action: TakeAction,
    ) -> ManagerResult<()> {
        let (uuid, status) = {
            let set = self
                .queue
                .current_command_set()
                .ok_or(ManagerError::NoCommandInProgress)?;
            if !set.is_owned_by(commander) {
                return Err(ManagerError::CommanderMismatch(commander.id().to_string()));
            }
            (set.uuid, set.operation_status)
        };
        debug!("Take action {} in {} from {}", action, status, commander.id());

        match action {
            TakeAction::Done => {
                self.disarm_in_flight(uuid);
                self.update_status(OperationStatus::ReceiveDataDone);
            }
            TakeAction::Next => {
                self.disarm_in_flight(uuid);
                self.update_status(OperationStatus::ReceiveNextForce);
            }
            TakeAction::Wait => {
                if status != OperationStatus::WaitErrorHandling {
                    self.update_status(OperationStatus::ReceiveWaitMoreData);
                }
                return Ok(());
            }
            TakeAction::Retry => {
                self.disarm_in_flight(uuid);
                if status == OperationStatus::WaitErrorHandling {
                    self.retry_attempts = 0;
                }
                if status != OperationStatus::ProcessingDeleteCommand {
                    self.retry_request_processing_command().await;
                }
            }
        }
        self.manage_processing_command().await;
        Ok(())
    }

    /// Inbound bytes from the transport.
    pub fn on_data(&mut self, data: &[u8]) {
        let Some(status) = self
            .queue
            .current_command_set()
            .map(|set| set.operation_status)
        else {
            debug!(
                "Orphaned receive on {}: {}",
                self.spreader,
                hex::encode(data)
            );
            return;
        };
        if status.is_in_flight() || status == OperationStatus::Wait {
            self.update_status(OperationStatus::ReceiveWaitProcessingData);
        }
        if let Some(set) = self.queue.current_command_set() {
            match &set.commander {
                Some(commander) => commander.on_dc_data(data, set, &self.spreader),
                None => debug!("No receiver for {} bytes on {}", data.len(), self.spreader),
            }
        }
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Data(data) => self.on_data(&data),
            TransportEvent::Connected => {
                info!("Device {} connected", self.spreader);
                self.emitter
                    .notify_device_event(&DeviceEvent::Connect, &self.spreader);
            }
            TransportEvent::Disconnected => {
                warn!("Device {} disconnected", self.spreader);
                self.wipe();
                self.emitter
                    .notify_device_event(&DeviceEvent::Disconnect, &self.spreader);
            }
            TransportEvent::Error(message) => {
                warn!("Device {} error: {}", self.spreader, message);
                if !self.transport.is_connected() {
                    self.wipe();
                }
                self.emitter
                    .notify_device_event(&DeviceEvent::Error(message), &self.spreader);
            }
        }
    }

    /// Process every timer due at `now`, stepping the scheduler after each.
    pub async fn fire_due_timers(&mut self, now: Instant) {
        for (kind, uuid) in self.timers.take_due(now) {
            match kind {
                TimerKind::Execution => self.on_execution_timeout(uuid).await,
                TimerKind::Retry => self.on_retry_elapsed(uuid).await,
                TimerKind::DelayReturn => self.on_delay_elapsed(uuid),
            }
            self.manage_processing_command().await;
        }
    }

    /// Step the state machine until it has to wait.
    pub async fn manage_processing_command(&mut self) {
        while let Flow::Continue = self.step().await {}
    }

    async fn step(&mut self) -> Flow {
        let Some((uuid, status, has_error_handling)) =
            self.queue.current_command_set().map(|set| {
                (
                    set.uuid,
                    set.operation_status,
                    set.control_info.has_error_handling,
                )
            })
        else {
            if self.queue.next_command_set().is_none() {
                self.has_perform_command = false;
                return Flow::Idle;
            }
            self.has_perform_command = true;
            self.next_command().await;
            return Flow::Continue;
        };
        self.has_perform_command = true;

        match status {
            OperationStatus::RequestCmd
            | OperationStatus::ReceiveWaitData
            | OperationStatus::ReceiveWaitProcessingData
            | OperationStatus::ReceiveWaitMoreData
            | OperationStatus::WaitErrorHandling => Flow::Idle,
            OperationStatus::Wait => {
                if self.holding {
                    return Flow::Idle;
                }
                self.request_processing_command().await;
                Flow::Continue
            }
            OperationStatus::ProcessingDeleteCommand => {
                // Let the in-flight command resolve first.
                if self.timers.is_armed(TimerKind::Execution, uuid)
                    || self.timers.is_armed(TimerKind::Retry, uuid)
                {
                    return Flow::Idle;
                }
                if let Some(set) = self.queue.clear_current_command_set() {
                    self.timers.disarm_all_for(set.uuid);
                    self.started.remove(&set.uuid);
                    info!("Deleted current command set {}", set.label());
                    notify_message(&set, MessageCode::CommandSetDelete, None, &self.spreader);
                }
                self.holding = false;
                self.last_error = None;
                Flow::Continue
            }
            OperationStatus::ProcessingDelayCommand => {
                self.move_current_to_delay();
                Flow::Continue
            }
            OperationStatus::EDisconnectedDevice => {
                self.wipe();
                Flow::Idle
            }
            OperationStatus::ReceiveDataDone
            | OperationStatus::ReceiveNextForce
            | OperationStatus::ENonCmd => {
                self.advance(status).await;
                Flow::Continue
            }
            OperationStatus::ETimeout
            | OperationStatus::EDataPart
            | OperationStatus::EUnhandlingData
            | OperationStatus::EIncorrectData
            | OperationStatus::ERetryMax
            | OperationStatus::EUnexpected => {
                let error = DcErrorInfo::from_status(status);
                if let Some(set) = self.queue.current_command_set() {
                    warn!("Command set {} failed: {}", set.label(), status);
                    if let Some(commander) = &set.commander {
                        commander.on_dc_error(set, &error, &self.spreader);
                    }
                }
                self.last_error = Some(error);
                if has_error_handling {
                    self.update_status(OperationStatus::WaitErrorHandling);
                    return Flow::Idle;
                }
                self.advance(status).await;
                Flow::Continue
            }
        }
    }

    /// Finish the current command and move on, honoring one-and-one holds.
    async fn advance(&mut self, status: OperationStatus) {
        if self.queue.is_done() {
            let error = self.last_error.take();
            let mut one_and_one = false;
            if let Some(set) = self.queue.current_command_set() {
                one_and_one = set.control_info.has_one_and_one;
                if !self.holding {
                    info!("Command set {} complete", set.label());
                    notify_message(
                        set,
                        MessageCode::CommandSetExecutionTerminate,
                        error.as_ref(),
                        &self.spreader,
                    );
                }
            }
            self.update_status(OperationStatus::Wait);

            if one_and_one && status != OperationStatus::ReceiveNextForce {
                if !self.holding {
                    self.holding = true;
                    if let Some(set) = self.queue.current_command_set() {
                        debug!("Holding {} for one-and-one communication", set.label());
                        notify_message(set, MessageCode::OneAndOneComm, None, &self.spreader);
                    }
                }
                return;
            }
            self.holding = false;
        }
        self.last_error = None;
        self.next_command().await;
    }

    /// Reset the retry budget, move the cursor and transmit.
    async fn next_command(&mut self) {
        self.retry_attempts = 0;
        let previous = self.queue.current_command_set().map(|set| set.uuid);
        if let Some(uuid) = previous {
            self.disarm_in_flight(uuid);
        }

        match self.queue.change_next_command() {
            None => {
                if let Some(uuid) = previous {
                    self.started.remove(&uuid);
                }
                debug!("No more command sets on {}", self.spreader);
                self.has_perform_command = false;
                return;
            }
            Some(Advance::Cursor) => {}
            Some(advance) => {
                if advance == Advance::Pulled {
                    if let Some(uuid) = previous {
                        self.started.remove(&uuid);
                    }
                }
                if let Some(set) = self.queue.current_command_set() {
                    if self.started.insert(set.uuid) {
                        info!(
                            "Starting command set {} (rank {}) on {}",
                            set.label(),
                            set.rank,
                            self.spreader
                        );
                        notify_message(
                            set,
                            MessageCode::CommandSetExecutionStart,
                            None,
                            &self.spreader,
                        );
                    } else {
                        debug!(
                            "Resuming command set {} at command {}",
                            set.label(),
                            set.curr_cmd_index
                        );
                    }
                }
            }
        }
        self.request_processing_command().await;
    }

    async fn request_processing_command(&mut self) {
        let status = self
            .queue
            .current_command_set()
            .map(|set| set.operation_status);
        if matches!(status, None | Some(OperationStatus::ProcessingDeleteCommand)) {
            return;
        }
        if !self.transport.is_connected() {
            self.update_status(OperationStatus::EDisconnectedDevice);
            return;
        }
        let Some(command) = self.queue.current_command().cloned() else {
            self.update_status(OperationStatus::ENonCmd);
            return;
        };
        if command.delay_execution_timeout_ms.is_some() {
            self.update_status(OperationStatus::ProcessingDelayCommand);
            return;
        }
        self.transfer_command_to_device(command).await;
    }

    async fn transfer_command_to_device(&mut self, command: Command) {
        let Some(uuid) = self.queue.current_command_set().map(|set| set.uuid) else {
            return;
        };
        self.update_status(OperationStatus::RequestCmd);
        debug!(
            "Transmitting to {}: {}",
            self.spreader,
            hex::encode(&command.data)
        );

        match self.transport.write(&command.data).await {
            Ok(()) => {
                self.update_status(OperationStatus::ReceiveWaitData);
                let timeout = Duration::from_millis(command.command_execution_timeout_ms);
                self.timers
                    .arm(TimerKind::Execution, uuid, Instant::now() + timeout);
            }
            Err(e) => {
                warn!("Write to {} failed: {}", self.spreader, e);
                if self.transport.is_connected() {
                    self.update_status(OperationStatus::EUnexpected);
                } else {
                    self.update_status(OperationStatus::EDisconnectedDevice);
                }
            }
        }
    }

    async fn retry_request_processing_command(&mut self) {
        let Some(uuid) = self.queue.current_command_set().map(|set| set.uuid) else {
            return;
        };
        self.retry_attempts += 1;
        if !self.config.retry.should_retry(self.retry_attempts) {
            warn!(
                "Retry budget of {} exhausted on {}",
                self.config.retry.max_attempts(),
                self.spreader
            );
            self.update_status(OperationStatus::ERetryMax);
            return;
        }

        let delay = self.config.retry.delay(self.retry_attempts);
        info!(
            "Retrying command on {} (attempt {}/{}) in {:?}",
            self.spreader,
            self.retry_attempts + 1,
            self.config.retry.max_attempts(),
            delay
        );
        self.update_status(OperationStatus::RequestCmd);
        if delay.is_zero() {
            self.request_processing_command().await;
        } else {
            self.timers
                .arm(TimerKind::Retry, uuid, Instant::now() + delay);
        }
    }

    async fn on_execution_timeout(&mut self, uuid: Uuid) {
        let Some(status) = self
            .queue
            .current_command_set()
            .filter(|set| set.uuid == uuid)
            .map(|set| set.operation_status)
        else {
            debug!("Ignoring stale execution timer for {}", uuid);
            return;
        };
        if status == OperationStatus::ProcessingDeleteCommand {
            return;
        }
        let flavored = status.timeout_flavor();
        warn!(
            "Execution timer expired on {} in {}: {}",
            self.spreader, status, flavored
        );
        if flavored == OperationStatus::ETimeout && self.config.retry_on_timeout {
            self.retry_request_processing_command().await;
            return;
        }
        self.update_status(flavored);
    }

    async fn on_retry_elapsed(&mut self, uuid: Uuid) {
        let is_current = self
            .queue
            .current_command_set()
            .is_some_and(|set| set.uuid == uuid);
        if is_current {
            self.request_processing_command().await;
        }
    }

    fn on_delay_elapsed(&mut self, uuid: Uuid) {
        if self.queue.return_from_delay(uuid) {
            info!("Command set {} returned from delay", uuid);
        } else {
            debug!("Delayed command set {} no longer parked", uuid);
        }
    }

    fn move_current_to_delay(&mut self) {
        if let Some(set) = self.queue.current_command_set() {
            notify_message(set, MessageCode::CommandSetMoveDelaySet, None, &self.spreader);
        }
        match self.queue.move_to_reserved_cmd_list() {
            Ok((uuid, delay)) => {
                info!("Command set {} delayed for {:?}", uuid, delay);
                self.timers.disarm(TimerKind::Execution, uuid);
                self.timers
                    .arm(TimerKind::DelayReturn, uuid, Instant::now() + delay);
            }
            Err(e) => {
                warn!("Cannot delay command set: {}", e);
                self.update_status(OperationStatus::EUnexpected);
            }
        }
    }

    /// Drop every set, reporting the disconnect to each owner.
    fn wipe(&mut self) {
        let deletion = self.queue.delete_command_set(None);
        self.timers.clear();
        self.started.clear();
        self.has_perform_command = false;
        self.holding = false;
        self.retry_attempts = 0;
        self.last_error = None;

        if deletion.removed.is_empty() {
            return;
        }
        warn!(
            "Discarding {} command sets on {}",
            deletion.removed.len(),
            self.spreader
        );
        let error = DcErrorInfo::from_status(OperationStatus::EDisconnectedDevice);
        for mut set in deletion.removed {
            set.operation_status = OperationStatus::EDisconnectedDevice;
            if let Some(commander) = &set.commander {
                commander.on_dc_error(&set, &error, &self.spreader);
            }
        }
    }

    fn disarm_in_flight(&mut self, uuid: Uuid) {
        self.timers.disarm(TimerKind::Execution, uuid);
        self.timers.disarm(TimerKind::Retry, uuid);
    }

    /// Pending delete is sticky until the set is torn down.
    fn update_status(&mut self, status: OperationStatus) {
        if let Some(set) = self.queue.current_command_set_mut() {
            if set.operation_status == OperationStatus::ProcessingDeleteCommand {
                return;
            }
            set.operation_status = status;
        }
    }
}

fn notify_message(
    set: &CommandSet,
    code: MessageCode,
    error: Option<&DcErrorInfo>,
    spreader: &str,
) {
    if let Some(commander) = &set.commander {
        commander.on_dc_message(set, code, error, spreader);
    }
}
