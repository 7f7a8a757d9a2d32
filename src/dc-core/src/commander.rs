// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Commander notification contract.
//!
//! A commander is the logical owner of command sets. The manager calls back
//! into it with inbound data, errors and lifecycle messages, and broadcasts
//! connection events to every commander attached to the device.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::command::{CommandSet, Rank};
use crate::status::{DeviceEvent, MessageCode, OperationStatus};

/// Named error delivered to a commander.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DcErrorInfo {
    pub name: OperationStatus,
    pub message: String,
}

impl DcErrorInfo {
    pub fn from_status(status: OperationStatus) -> Self {
        Self {
            name: status,
            message: status.as_str().to_string(),
        }
    }
}

/// Trait for the owners of command sets.
///
/// All notification methods have default no-op implementations, so
/// commanders only override the ones they care about. `spreader` names the
/// manager (connection) the notification comes from.
pub trait Commander: Send + Sync {
    /// Stable identifier, used for filtering and in error messages.
    fn id(&self) -> &str;

    /// Inbound bytes for the set currently executing.
    fn on_dc_data(&self, _data: &[u8], _command_set: &CommandSet, _spreader: &str) {}

    /// A named error tied to the active set.
    fn on_dc_error(&self, _command_set: &CommandSet, _error: &DcErrorInfo, _spreader: &str) {}

    /// Lifecycle notice for one of this commander's sets.
    fn on_dc_message(
        &self,
        _command_set: &CommandSet,
        _code: MessageCode,
        _error: Option<&DcErrorInfo>,
        _spreader: &str,
    ) {
    }

    /// Connection event, independent of any set.
    fn updated_dc_event_on_device(&self, _event: &DeviceEvent, _spreader: &str) {}
}

/// Shared reference to a commander, compared by identity.
#[derive(Clone)]
pub struct CommanderRef(Arc<dyn Commander>);

impl CommanderRef {
    pub fn new(commander: Arc<dyn Commander>) -> Self {
        Self(commander)
    }

    pub fn id(&self) -> &str {
        self.0.id()
    }
}

impl<C: Commander + 'static> From<Arc<C>> for CommanderRef {
    fn from(value: Arc<C>) -> Self {
        Self(value)
    }
}

impl std::ops::Deref for CommanderRef {
    type Target = dyn Commander;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for CommanderRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl Eq for CommanderRef {}

impl fmt::Debug for CommanderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CommanderRef").field(&self.id()).finish()
    }
}

impl Serialize for CommanderRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}

/// Compact view of a command set carried by notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSetSummary {
    pub uuid: Uuid,
    pub rank: Rank,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    pub curr_cmd_index: usize,
    pub operation_status: OperationStatus,
}

impl From<&CommandSet> for CommandSetSummary {
    fn from(set: &CommandSet) -> Self {
        Self {
            uuid: set.uuid,
            rank: set.rank,
            command_id: set.command_id.clone(),
            curr_cmd_index: set.curr_cmd_index,
            operation_status: set.operation_status,
        }
    }
}

/// A notification captured by [`ChannelCommander`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommanderEvent {
    Data {
        spreader: String,
        command_set: CommandSetSummary,
        #[serde(serialize_with = "crate::command::hex_payload::serialize")]
        data: Vec<u8>,
    },
    Error {
        spreader: String,
        command_set: CommandSetSummary,
        error: DcErrorInfo,
    },
    Message {
        spreader: String,
        command_set: CommandSetSummary,
        code: MessageCode,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<DcErrorInfo>,
    },
    DeviceEvent {
        spreader: String,
        event: DeviceEvent,
    },
}

/// Commander that forwards every notification into a channel.
///
/// Used by the network listener to stream notifications to a client, and
/// by tests to observe the manager.
pub struct ChannelCommander {
    id: String,
    tx: mpsc::UnboundedSender<CommanderEvent>,
}

impl ChannelCommander {
    pub fn new(id: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<CommanderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { id: id.into(), tx }), rx)
    }

    fn forward(&self, event: CommanderEvent) {
        // Receiver gone means the client went away; nothing left to notify.
        let _ = self.tx.send(event);
    }
}

impl Commander for ChannelCommander {
    fn id(&self) -> &str {
        &self.id
    }

    fn on_dc_data(&self, data: &[u8], command_set: &CommandSet, spreader: &str) {
        self.forward(CommanderEvent::Data {
            spreader: spreader.to_string(),
            command_set: command_set.into(),
            data: data.to_vec(),
        });
    }

    fn on_dc_error(&self, command_set: &CommandSet, error: &DcErrorInfo, spreader: &str) {
        self.forward(CommanderEvent::Error {
            spreader: spreader.to_string(),
            command_set: command_set.into(),
            error: error.clone(),
        });
    }

    fn on_dc_message(
        &self,
        command_set: &CommandSet,
        code: MessageCode,
        error: Option<&DcErrorInfo>,
        spreader: &str,
    ) {
        self.forward(CommanderEvent::Message {
            spreader: spreader.to_string(),
            command_set: command_set.into(),
            code,
            error: error.cloned(),
        });
    }

    fn updated_dc_event_on_device(&self, event: &DeviceEvent, spreader: &str) {
        self.forward(CommanderEvent::DeviceEvent {
            spreader: spreader.to_string(),
            event: event.clone(),
        });
    }
}

/// Unique identifier for an attached commander.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Commanders attached to one device for connection events.
#[derive(Default)]
pub struct DeviceEventEmitter {
    listeners: Vec<(ListenerId, CommanderRef)>,
}

impl DeviceEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a commander. Attaching the same commander twice returns the
    /// existing id.
    pub fn register(&mut self, commander: CommanderRef) -> ListenerId {
        if let Some((id, _)) = self.listeners.iter().find(|(_, c)| *c == commander) {
            return *id;
        }
        let id = ListenerId::new();
        self.listeners.push((id, commander));
        id
    }

    pub fn unregister(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    /// Detach every commander with the given id.
    pub fn unregister_commander(&mut self, commander_id: &str) {
        self.listeners.retain(|(_, c)| c.id() != commander_id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn notify_device_event(&self, event: &DeviceEvent, spreader: &str) {
        for (_, commander) in &self.listeners {
            commander.updated_dc_event_on_device(event, spreader);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    struct Silent;

    impl Commander for Silent {
        fn id(&self) -> &str {
            "silent"
        }
    }

    #[test]
    fn test_commander_ref_identity() {
        let a: CommanderRef = Arc::new(Silent).into();
        let b: CommanderRef = Arc::new(Silent).into();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_channel_commander_forwards() {
        let (commander, mut rx) = ChannelCommander::new("client-1");
        let set = CommandSet::new(2, vec![Command::new(vec![1])]).with_command_id("poll");

        commander.on_dc_data(&[0xaa], &set, "loopback:a");
        commander.on_dc_message(&set, MessageCode::CommandSetExecutionStart, None, "loopback:a");

        match rx.try_recv().unwrap() {
            CommanderEvent::Data { data, command_set, .. } => {
                assert_eq!(data, vec![0xaa]);
                assert_eq!(command_set.command_id.as_deref(), Some("poll"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            CommanderEvent::Message {
                code: MessageCode::CommandSetExecutionStart,
                ..
            }
        ));
    }

    #[test]
    fn test_event_serialization() {
        let set = CommandSet::new(1, vec![]);
        let event = CommanderEvent::Data {
            spreader: "loopback:a".into(),
            command_set: (&set).into(),
            data: vec![0x01, 0xff],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "data");
        assert_eq!(json["data"], "01ff");
        assert_eq!(json["command_set"]["operation_status"], "WAIT");
    }

    #[test]
    fn test_emitter_register_and_notify() {
        let mut emitter = DeviceEventEmitter::new();
        let (commander, mut rx) = ChannelCommander::new("c");
        let commander: CommanderRef = commander.into();
        let id = emitter.register(commander.clone());
        assert_eq!(emitter.register(commander), id);
        assert_eq!(emitter.listener_count(), 1);

        emitter.notify_device_event(&DeviceEvent::Disconnect, "serial:/dev/ttyUSB0");
        assert!(matches!(
            rx.try_recv().unwrap(),
            CommanderEvent::DeviceEvent {
                event: DeviceEvent::Disconnect,
                ..
            }
        ));

        emitter.unregister(id);
        assert_eq!(emitter.listener_count(), 0);
    }
}
