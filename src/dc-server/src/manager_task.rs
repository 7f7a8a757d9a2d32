// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! One task per device connection, owning its manager and transport.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use dc_core::controller::ReconnectSupervisor;
use dc_core::{
    DynResult, Manager, ManagerCommand, ManagerConfig, ManagerReply, ManagerRequest,
    ManagerResult, ManagerSnapshot, Transport, TransportEvent,
};

/// Configuration for the manager task.
pub struct ManagerTaskConfig {
    pub name: String,
    pub manager: ManagerConfig,
    pub reconnect: ReconnectSupervisor,
}

/// Run the manager task until shutdown or until every handle is dropped.
pub async fn run_manager_task(
    config: ManagerTaskConfig,
    transport: Box<dyn Transport>,
    mut events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    mut rx: mpsc::Receiver<ManagerRequest>,
    state_tx: watch::Sender<ManagerSnapshot>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> DynResult<()> {
    let ManagerTaskConfig {
        name,
        manager: manager_config,
        mut reconnect,
    } = config;
    let mut manager = Manager::new(transport, manager_config);
    info!("Opening device {} ({})", name, manager.connection_id());

    if let Err(e) = manager.connect().await {
        warn!("Device {} connect failed: {}", name, e);
        schedule_reconnect(&mut reconnect, &name);
    }
    publish(&manager, &state_tx);

    loop {
        let deadline = earliest(manager.next_deadline(), reconnect.deadline());

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            maybe_req = rx.recv() => {
                let Some(ManagerRequest { cmd, respond_to }) = maybe_req else { break; };
                let cmd_label = command_label(&cmd);
                let started = Instant::now();
                let result = process_command(&mut manager, cmd).await;
                let _ = respond_to.send(result);

                let elapsed = started.elapsed();
                if elapsed > Duration::from_millis(500) {
                    warn!("Manager command {} took {:?}", cmd_label, elapsed);
                } else {
                    debug!("Manager command {} completed in {:?}", cmd_label, elapsed);
                }
            }

            Some(event) = events_rx.recv() => {
                match &event {
                    TransportEvent::Connected => reconnect.reset(),
                    TransportEvent::Disconnected => schedule_reconnect(&mut reconnect, &name),
                    TransportEvent::Error(_) if !manager.is_connected() => {
                        schedule_reconnect(&mut reconnect, &name)
                    }
                    _ => {}
                }
                manager.handle_transport_event(event);
            }

            _ = sleep_until(deadline) => {
                let now = Instant::now();
                if reconnect.take_due(now) {
                    info!(
                        "Reconnecting device {} (attempt {})",
                        name,
                        reconnect.attempts()
                    );
                    if let Err(e) = manager.connect().await {
                        warn!("Device {} reconnect failed: {}", name, e);
                        schedule_reconnect(&mut reconnect, &name);
                    }
                }
                manager.fire_due_timers(now).await;
            }
        }

        publish(&manager, &state_tx);
    }

    info!("Manager task for {} shutting down", name);
    manager.shutdown().await;
    publish(&manager, &state_tx);
    Ok(())
}

async fn process_command(
    manager: &mut Manager,
    cmd: ManagerCommand,
) -> ManagerResult<ManagerReply> {
    match cmd {
        ManagerCommand::AddCommandSet(set) => {
            manager.add_command_set(set).await.map(ManagerReply::Added)
        }
        ManagerCommand::DeleteCommandSet { command_id } => {
            manager.delete_command_set(&command_id).await;
            Ok(ManagerReply::Ack)
        }
        ManagerCommand::DeleteCommandSetByUuid(uuid) => {
            manager.delete_command_set_by_uuid(uuid).await;
            Ok(ManagerReply::Ack)
        }
        ManagerCommand::DeleteByCommander(commander_id) => {
            manager.delete_by_commander(&commander_id).await;
            Ok(ManagerReply::Ack)
        }
        ManagerCommand::TakeAction { commander, action } => manager
            .request_take_action(&commander, action)
            .await
            .map(|()| ManagerReply::Ack),
        ManagerCommand::FindCommandStorage(filter) => {
            Ok(ManagerReply::Sets(manager.find_command_storage(&filter)))
        }
        ManagerCommand::FilterCommandStorage(filter) => {
            Ok(ManagerReply::Storage(manager.filter_command_storage(&filter)))
        }
        ManagerCommand::AttachCommander(commander) => {
            Ok(ManagerReply::Attached(manager.attach_commander(commander)))
        }
        ManagerCommand::DetachCommander(commander_id) => {
            manager.detach_commander(&commander_id);
            Ok(ManagerReply::Ack)
        }
        ManagerCommand::GetSnapshot => Ok(ManagerReply::Snapshot(Box::new(manager.snapshot()))),
    }
}

fn command_label(cmd: &ManagerCommand) -> &'static str {
    match cmd {
        ManagerCommand::AddCommandSet(_) => "add_command_set",
        ManagerCommand::DeleteCommandSet { .. } => "delete_command_set",
        ManagerCommand::DeleteCommandSetByUuid(_) => "delete_command_set_by_uuid",
        ManagerCommand::DeleteByCommander(_) => "delete_by_commander",
        ManagerCommand::TakeAction { .. } => "take_action",
        ManagerCommand::FindCommandStorage(_) => "find_command_storage",
        ManagerCommand::FilterCommandStorage(_) => "filter_command_storage",
        ManagerCommand::AttachCommander(_) => "attach_commander",
        ManagerCommand::DetachCommander(_) => "detach_commander",
        ManagerCommand::GetSnapshot => "get_snapshot",
    }
}

fn schedule_reconnect(reconnect: &mut ReconnectSupervisor, name: &str) {
    if !reconnect.is_enabled() {
        return;
    }
    match reconnect.schedule(Instant::now()) {
        Some(at) => debug!(
            "Device {} reconnect planned in {:?}",
            name,
            at.saturating_duration_since(Instant::now())
        ),
        None => warn!(
            "Device {} out of reconnect attempts after {}",
            name,
            reconnect.attempts()
        ),
    }
}

fn publish(manager: &Manager, state_tx: &watch::Sender<ManagerSnapshot>) {
    let _ = state_tx.send(manager.snapshot());
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
