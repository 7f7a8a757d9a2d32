// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! JSON-over-TCP listener for dc-server.
//!
//! Accepts client connections speaking the `ClientEnvelope`/`ClientResponse`
//! protocol defined in `dc-protocol`. Every connection is one commander:
//! sets it adds are owned by it, and their notifications are streamed back
//! on the same socket as `Notification` lines.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use dc_core::{ChannelCommander, CommanderRef, ConnectionId};
use dc_protocol::auth::{SimpleTokenValidator, TokenValidator};
use dc_protocol::codec::{encode_line, parse_envelope};
use dc_protocol::mapping::{command_set_from_client, parse_take_action};
use dc_protocol::{ClientCommand, ClientResponse, DeviceInfo, Notification};

use crate::registry::ManagerRegistry;
use crate::wait_for_shutdown;

/// Run the JSON TCP listener, accepting client connections.
pub async fn run_listener(
    addr: SocketAddr,
    registry: Arc<ManagerRegistry>,
    validator: Arc<SimpleTokenValidator>,
    shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);
    serve(listener, registry, validator, shutdown_rx).await
}

/// Accept loop over an already bound socket.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<ManagerRegistry>,
    validator: Arc<SimpleTokenValidator>,
    shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = wait_for_shutdown(shutdown_rx.clone()) => {
                info!("Listener shutting down");
                return Ok(());
            }
        };
        info!("Client connected: {}", peer);

        let registry = Arc::clone(&registry);
        let validator = Arc::clone(&validator);
        let client_shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                handle_client(socket, peer, registry, validator, client_shutdown_rx).await
            {
                error!("Client {} error: {:?}", peer, e);
            }
        });
    }
}

/// Per-connection state.
struct ClientSession {
    registry: Arc<ManagerRegistry>,
    commander: CommanderRef,
    subscriptions: HashSet<ConnectionId>,
    /// Devices this client has queued sets on.
    owned: HashSet<ConnectionId>,
}

type CommandOutcome = Result<Option<serde_json::Value>, String>;

fn to_json<T: Serialize>(value: &T) -> CommandOutcome {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| format!("Failed to encode result: {}", e))
}

impl ClientSession {
    async fn execute(&mut self, cmd: ClientCommand, device: Option<&str>) -> CommandOutcome {
        if let ClientCommand::ListDevices = cmd {
            let devices: Vec<DeviceInfo> = self
                .registry
                .handles()
                .into_iter()
                .map(|handle| {
                    let state = handle.snapshot();
                    DeviceInfo {
                        name: handle.name.clone(),
                        connection: handle.connection.clone(),
                        connected: state.connected,
                        has_perform_command: state.has_perform_command,
                    }
                })
                .collect();
            return to_json(&devices);
        }

        let handle = self.registry.resolve(device)?;
        match cmd {
            ClientCommand::ListDevices => Ok(None),
            // Served from the watch channel so it answers while the task is busy.
            ClientCommand::GetState => to_json(&handle.snapshot()),
            ClientCommand::AddCommandSet {
                rank,
                command_id,
                commands,
                control,
            } => {
                let set = command_set_from_client(
                    rank,
                    command_id,
                    commands,
                    control,
                    self.commander.clone(),
                );
                let uuid = handle
                    .add_command_set(set)
                    .await
                    .map_err(|e| e.to_string())?;
                self.owned.insert(handle.connection.clone());
                Ok(Some(serde_json::json!({ "uuid": uuid })))
            }
            ClientCommand::DeleteCommandSet { command_id, uuid } => {
                let result = match (uuid, command_id) {
                    (Some(uuid), _) => handle.delete_command_set_by_uuid(uuid).await,
                    (None, Some(command_id)) => handle.delete_command_set(&command_id).await,
                    (None, None) => {
                        return Err("delete_command_set requires command_id or uuid".into())
                    }
                };
                result.map(|()| None).map_err(|e| e.to_string())
            }
            ClientCommand::TakeAction { action } => {
                let action = parse_take_action(&action).map_err(|e| e.to_string())?;
                handle
                    .take_action(self.commander.clone(), action)
                    .await
                    .map(|()| None)
                    .map_err(|e| e.to_string())
            }
            ClientCommand::FindStorage { filter } => {
                let sets = handle
                    .find_command_storage(filter)
                    .await
                    .map_err(|e| e.to_string())?;
                to_json(&sets)
            }
            ClientCommand::FilterStorage { filter } => {
                let storage = handle
                    .filter_command_storage(filter)
                    .await
                    .map_err(|e| e.to_string())?;
                to_json(&storage)
            }
            ClientCommand::Subscribe => {
                if self.subscriptions.contains(&handle.connection) {
                    return Ok(None);
                }
                handle
                    .attach_commander(self.commander.clone())
                    .await
                    .map_err(|e| e.to_string())?;
                self.subscriptions.insert(handle.connection.clone());
                Ok(None)
            }
            ClientCommand::Unsubscribe => {
                if self.subscriptions.remove(&handle.connection) {
                    handle
                        .detach_commander(self.commander.id())
                        .await
                        .map_err(|e| e.to_string())?;
                }
                Ok(None)
            }
        }
    }

    /// Drop a departed client's sets and stop its device event delivery.
    ///
    /// Only the owner can release a frozen or held set, so leaving them
    /// queued would stall the device.
    async fn close(&mut self) {
        for connection in self.owned.drain() {
            if let Some(handle) = self.registry.get(&connection) {
                if let Err(e) = handle.delete_by_commander(self.commander.id()).await {
                    debug!("Cleanup on {} failed: {}", connection, e);
                }
            }
        }
        for connection in self.subscriptions.drain() {
            if let Some(handle) = self.registry.get(&connection) {
                if let Err(e) = handle.detach_commander(self.commander.id()).await {
                    debug!("Detach from {} failed: {}", connection, e);
                }
            }
        }
    }
}

async fn handle_client(
    socket: TcpStream,
    addr: SocketAddr,
    registry: Arc<ManagerRegistry>,
    validator: Arc<SimpleTokenValidator>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);

    // Responses and notifications share the socket through one writer task.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let (commander, mut notify_rx) = ChannelCommander::new(format!("client-{}", addr));
    let notify_tx = out_tx.clone();
    let notify_task = tokio::spawn(async move {
        while let Some(notification) = notify_rx.recv().await {
            match encode_line(&Notification { notification }) {
                Ok(line) => {
                    if notify_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to encode notification: {}", e),
            }
        }
    });

    let mut session = ClientSession {
        registry,
        commander: commander.into(),
        subscriptions: HashSet::new(),
        owned: HashSet::new(),
    };

    let mut line = String::new();
    let result = loop {
        line.clear();
        let bytes_read = tokio::select! {
            read = reader.read_line(&mut line) => match read {
                Ok(n) => n,
                Err(e) => break Err(e),
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break Ok(());
                }
                continue;
            }
        };
        if bytes_read == 0 {
            info!("Client {} disconnected", addr);
            break Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match parse_envelope(trimmed) {
            Err(e) => {
                error!("Invalid JSON from {}: {} / {:?}", addr, trimmed, e);
                ClientResponse::err(format!("Invalid JSON: {}", e))
            }
            Ok(envelope) => match validator.validate(envelope.token.as_deref()) {
                Err(e) => ClientResponse::err(e.to_string()),
                Ok(()) => match session
                    .execute(envelope.cmd, envelope.device.as_deref())
                    .await
                {
                    Ok(result) => ClientResponse::ok(result),
                    Err(e) => ClientResponse::err(e),
                },
            },
        };

        match encode_line(&response) {
            Ok(resp_line) => {
                if out_tx.send(resp_line).is_err() {
                    break Ok(());
                }
            }
            Err(e) => error!("Failed to encode response for {}: {}", addr, e),
        }
    };

    session.close().await;
    notify_task.abort();
    drop(out_tx);
    match writer_task.await {
        Ok(Err(e)) if result.is_ok() => return Err(e),
        Ok(_) => {}
        Err(e) => debug!("Writer task for {} ended: {}", addr, e),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::time::timeout;

    use dc_transport::{register_builtin_transports_on, TransportAccess, TransportRegistry};

    use crate::config::BehaviorConfig;

    struct Client {
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
        /// Notifications read past while waiting for a response.
        pending: VecDeque<Value>,
    }

    impl Client {
        async fn send(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }

        async fn next_line(&mut self) -> Value {
            let mut line = String::new();
            timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for a line")
                .unwrap();
            serde_json::from_str(&line).unwrap()
        }

        /// Next line that is a response. Notifications seen on the way are
        /// kept for `notification`.
        async fn response(&mut self) -> Value {
            loop {
                let mut value = self.next_line().await;
                match value.get_mut("notification") {
                    Some(n) => self.pending.push_back(n.take()),
                    None => return value,
                }
            }
        }

        /// Next notification matching `pred`, buffered ones first. Earlier
        /// non-matching notifications are discarded.
        async fn notification(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
            while let Some(n) = self.pending.pop_front() {
                if pred(&n) {
                    return n;
                }
            }
            loop {
                let value = self.next_line().await;
                if let Some(n) = value.get("notification") {
                    if pred(n) {
                        return n.clone();
                    }
                }
            }
        }
    }

    async fn start(devices: &[&str], tokens: &[&str]) -> (SocketAddr, watch::Sender<bool>) {
        let mut transports = TransportRegistry::new();
        register_builtin_transports_on(&mut transports);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut registry = ManagerRegistry::new(transports, shutdown_rx.clone());
        for name in devices {
            let handle = registry
                .get_or_spawn(
                    name,
                    TransportAccess::Loopback {
                        name: name.to_string(),
                    },
                    &BehaviorConfig::default(),
                )
                .unwrap();
            let mut state_rx = handle.state_rx.clone();
            state_rx.wait_for(|s| s.connected).await.unwrap();
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let validator = Arc::new(SimpleTokenValidator::new(tokens.iter().copied()));
        tokio::spawn(serve(listener, Arc::new(registry), validator, shutdown_rx));
        (addr, shutdown_tx)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Client {
            reader: BufReader::new(reader),
            writer,
            pending: VecDeque::new(),
        }
    }

    #[tokio::test]
    async fn test_list_devices() {
        let (addr, _shutdown) = start(&["alpha", "beta"], &[]).await;
        let mut client = connect(addr).await;
        client.send(r#"{"cmd":"list_devices"}"#).await;
        let resp = client.response().await;
        assert_eq!(resp["success"], true);
        let devices = resp["result"].as_array().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0]["name"], "alpha");
        assert_eq!(devices[0]["connected"], true);
        assert_eq!(devices[1]["connection"]["type"], "loopback");
    }

    #[tokio::test]
    async fn test_command_set_round_trip() {
        let (addr, _shutdown) = start(&["bench"], &[]).await;
        let mut client = connect(addr).await;

        client
            .send(r#"{"cmd":"add_command_set","rank":1,"command_id":"poll","commands":[{"data":"0a0b"}]}"#)
            .await;
        let resp = client.response().await;
        assert_eq!(resp["success"], true, "{}", resp);
        assert!(resp["result"]["uuid"].is_string());

        let data = client.notification(|n| n["kind"] == "data").await;
        assert_eq!(data["data"], "0a0b");
        assert_eq!(data["command_set"]["command_id"], "poll");

        client.send(r#"{"cmd":"take_action","action":"DONE"}"#).await;
        let resp = client.response().await;
        assert_eq!(resp["success"], true, "{}", resp);

        let done = client
            .notification(|n| n["kind"] == "message" && n["code"] == "COMMANDSET_EXECUTION_TERMINATE")
            .await;
        assert_eq!(done["spreader"], "loopback:bench");

        client.send(r#"{"cmd":"filter_storage"}"#).await;
        let resp = client.response().await;
        assert!(resp["result"]["current_command_set"].is_null());
    }

    #[tokio::test]
    async fn test_errors_are_reported() {
        let (addr, _shutdown) = start(&["alpha", "beta"], &[]).await;
        let mut client = connect(addr).await;

        client.send("garbage").await;
        let resp = client.response().await;
        assert_eq!(resp["success"], false);
        assert!(resp["error"].as_str().unwrap().starts_with("Invalid JSON"));

        client.send(r#"{"cmd":"get_state"}"#).await;
        let resp = client.response().await;
        assert!(resp["error"]
            .as_str()
            .unwrap()
            .contains("Device must be specified"));

        client
            .send(r#"{"cmd":"take_action","device":"alpha","action":"NEXT"}"#)
            .await;
        let resp = client.response().await;
        assert_eq!(resp["error"], "no command in progress");

        client
            .send(r#"{"cmd":"take_action","device":"alpha","action":"LATER"}"#)
            .await;
        let resp = client.response().await;
        assert_eq!(resp["error"], "unknown take action: LATER");

        client
            .send(r#"{"cmd":"delete_command_set","device":"beta"}"#)
            .await;
        let resp = client.response().await;
        assert_eq!(resp["success"], false);
    }

    #[tokio::test]
    async fn test_token_required() {
        let (addr, _shutdown) = start(&["bench"], &["s3cret"]).await;
        let mut client = connect(addr).await;

        client.send(r#"{"cmd":"get_state"}"#).await;
        let resp = client.response().await;
        assert_eq!(resp["error"], "missing authorization token");

        client
            .send(r#"{"cmd":"get_state","token":"Bearer s3cret"}"#)
            .await;
        let resp = client.response().await;
        assert_eq!(resp["success"], true);
        assert_eq!(resp["result"]["connected"], true);
    }

    #[tokio::test]
    async fn test_other_client_cannot_take_action() {
        let (addr, _shutdown) = start(&["bench"], &[]).await;
        let mut owner = connect(addr).await;
        let mut intruder = connect(addr).await;

        owner
            .send(r#"{"cmd":"add_command_set","rank":0,"commands":[{"data":"ff"}]}"#)
            .await;
        assert_eq!(owner.response().await["success"], true);
        owner.notification(|n| n["kind"] == "data").await;

        intruder
            .send(r#"{"cmd":"take_action","action":"DONE"}"#)
            .await;
        let resp = intruder.response().await;
        assert!(resp["error"]
            .as_str()
            .unwrap()
            .starts_with("commander mismatch"));
    }

    #[tokio::test]
    async fn test_departed_client_sets_are_dropped() {
        let (addr, _shutdown) = start(&["bench"], &[]).await;
        let mut leaver = connect(addr).await;
        let mut stayer = connect(addr).await;

        leaver
            .send(r#"{"cmd":"add_command_set","rank":1,"command_id":"frozen","commands":[{"data":"01","command_execution_timeout_ms":50}],"control":{"has_error_handling":true}}"#)
            .await;
        assert_eq!(leaver.response().await["success"], true);
        leaver.notification(|n| n["kind"] == "error").await;

        stayer.send(r#"{"cmd":"filter_storage"}"#).await;
        let resp = stayer.response().await;
        assert_eq!(
            resp["result"]["current_command_set"]["operation_status"],
            "WAIT_ERROR_HANDLING"
        );
        stayer
            .send(r#"{"cmd":"take_action","action":"NEXT"}"#)
            .await;
        let resp = stayer.response().await;
        assert!(resp["error"]
            .as_str()
            .unwrap()
            .starts_with("commander mismatch"));

        drop(leaver);

        stayer
            .send(r#"{"cmd":"add_command_set","rank":1,"command_id":"after","commands":[{"data":"02"}]}"#)
            .await;
        assert_eq!(stayer.response().await["success"], true);
        let data = stayer
            .notification(|n| n["kind"] == "data" && n["command_set"]["command_id"] == "after")
            .await;
        assert_eq!(data["data"], "02");

        stayer.send(r#"{"cmd":"find_storage","filter":{"command_id":"frozen"}}"#).await;
        let resp = stayer.response().await;
        assert_eq!(resp["result"].as_array().unwrap().len(), 0);
    }
}
