// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Command set data model.
//!
//! A [`CommandSet`] is purely descriptive: timers and in-flight bookkeeping
//! live in the manager's side-table, keyed by the set's `uuid`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commander::CommanderRef;
use crate::error::ManagerError;
use crate::status::OperationStatus;

/// Priority class of a command set. Lower numbers run first.
pub type Rank = u32;

/// Rank that preempts every other class.
pub const EMERGENCY_RANK: Rank = 0;

/// Execution timeout applied when a command does not specify one.
pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 1000;

fn default_execution_timeout_ms() -> u64 {
    DEFAULT_EXECUTION_TIMEOUT_MS
}

/// One transmission unit inside a command set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Payload written to the transport, hex-encoded on the wire.
    #[serde(with = "hex_payload")]
    pub data: Vec<u8>,
    /// Park the whole set for this long instead of transmitting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_execution_timeout_ms: Option<u64>,
    #[serde(default = "default_execution_timeout_ms")]
    pub command_execution_timeout_ms: u64,
}

impl Command {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            delay_execution_timeout_ms: None,
            command_execution_timeout_ms: DEFAULT_EXECUTION_TIMEOUT_MS,
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_execution_timeout_ms = Some(delay_ms);
        self
    }

    pub fn with_execution_timeout(mut self, timeout_ms: u64) -> Self {
        self.command_execution_timeout_ms = timeout_ms;
        self
    }
}

/// Behavioral flags fixed when the set is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlInfo {
    /// Hold the set as current after its list is exhausted.
    pub has_one_and_one: bool,
    /// Freeze on errors until the commander intervenes.
    pub has_error_handling: bool,
    pub has_reconnect: bool,
}

/// A prioritized batch of commands submitted as one unit.
#[derive(Debug, Clone, Serialize)]
pub struct CommandSet {
    pub uuid: Uuid,
    pub rank: Rank,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    pub cmd_list: Vec<Command>,
    pub curr_cmd_index: usize,
    pub operation_status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commander: Option<CommanderRef>,
    pub control_info: ControlInfo,
}

impl CommandSet {
    pub fn new(rank: Rank, cmd_list: Vec<Command>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            rank,
            command_id: None,
            cmd_list,
            curr_cmd_index: 0,
            operation_status: OperationStatus::Wait,
            commander: None,
            control_info: ControlInfo::default(),
        }
    }

    pub fn with_command_id(mut self, command_id: impl Into<String>) -> Self {
        self.command_id = Some(command_id.into());
        self
    }

    pub fn with_commander(mut self, commander: CommanderRef) -> Self {
        self.commander = Some(commander);
        self
    }

    pub fn with_control_info(mut self, control_info: ControlInfo) -> Self {
        self.control_info = control_info;
        self
    }

    pub fn is_emergency(&self) -> bool {
        self.rank == EMERGENCY_RANK
    }

    /// Command under the cursor, if any.
    pub fn current_command(&self) -> Option<&Command> {
        self.cmd_list.get(self.curr_cmd_index)
    }

    /// Command after the cursor, if any.
    pub fn next_command(&self) -> Option<&Command> {
        self.cmd_list.get(self.curr_cmd_index + 1)
    }

    pub fn commander_id(&self) -> Option<&str> {
        self.commander.as_ref().map(|c| c.id())
    }

    pub fn is_owned_by(&self, commander: &CommanderRef) -> bool {
        self.commander.as_ref() == Some(commander)
    }

    /// Label used in logs: the command id when present, else the uuid.
    pub fn label(&self) -> String {
        match &self.command_id {
            Some(id) => id.clone(),
            None => self.uuid.to_string(),
        }
    }

    /// Reject shapes the scheduler cannot drive.
    pub fn validate(&self) -> Result<(), ManagerError> {
        if self.curr_cmd_index > self.cmd_list.len() {
            return Err(ManagerError::InvalidCommandSet(format!(
                "cursor {} past end of {} commands",
                self.curr_cmd_index,
                self.cmd_list.len()
            )));
        }
        if let Some(idx) = self
            .cmd_list
            .iter()
            .position(|cmd| cmd.command_execution_timeout_ms == 0)
        {
            return Err(ManagerError::InvalidCommandSet(format!(
                "command {} has a zero execution timeout",
                idx
            )));
        }
        if matches!(self.command_id.as_deref(), Some(id) if id.trim().is_empty()) {
            return Err(ManagerError::InvalidCommandSet(
                "command id must not be blank".into(),
            ));
        }
        Ok(())
    }
}

pub(crate) mod hex_payload {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_defaults() {
        let cmd = Command::new(vec![0x01, 0x03]);
        assert_eq!(cmd.command_execution_timeout_ms, 1000);
        assert_eq!(cmd.delay_execution_timeout_ms, None);
    }

    #[test]
    fn test_command_deserializes_hex_payload_with_default_timeout() {
        let cmd: Command = serde_json::from_str(r#"{"data":"0a0B"}"#).unwrap();
        assert_eq!(cmd.data, vec![0x0a, 0x0b]);
        assert_eq!(cmd.command_execution_timeout_ms, DEFAULT_EXECUTION_TIMEOUT_MS);

        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["data"], "0a0b");
        assert!(json.get("delay_execution_timeout_ms").is_none());
    }

    #[test]
    fn test_cursor_accessors() {
        let mut set = CommandSet::new(2, vec![Command::new(b"a".to_vec()), Command::new(b"b".to_vec())]);
        assert_eq!(set.current_command().unwrap().data, b"a");
        assert_eq!(set.next_command().unwrap().data, b"b");
        set.curr_cmd_index = 1;
        assert!(set.next_command().is_none());
        set.curr_cmd_index = 2;
        assert!(set.current_command().is_none());
    }

    #[test]
    fn test_validate() {
        let set = CommandSet::new(1, vec![Command::new(vec![1])]);
        assert!(set.validate().is_ok());

        let mut bad_cursor = set.clone();
        bad_cursor.curr_cmd_index = 5;
        assert!(matches!(
            bad_cursor.validate(),
            Err(ManagerError::InvalidCommandSet(_))
        ));

        let zero_timeout = CommandSet::new(1, vec![Command::new(vec![1]).with_execution_timeout(0)]);
        assert!(zero_timeout.validate().is_err());

        let blank_id = CommandSet::new(1, vec![]).with_command_id("  ");
        assert!(blank_id.validate().is_err());
    }

    #[test]
    fn test_label_prefers_command_id() {
        let anon = CommandSet::new(3, vec![]);
        assert_eq!(anon.label(), anon.uuid.to_string());
        let named = CommandSet::new(3, vec![]).with_command_id("poll");
        assert_eq!(named.label(), "poll");
    }
}
