// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Transport DTOs for the JSON line protocol.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dc_core::{Command, CommandFilter, CommanderEvent, ConnectionId, ControlInfo, Rank};

/// Command received from network clients (JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ClientCommand {
    ListDevices,
    GetState,
    AddCommandSet {
        rank: Rank,
        #[serde(default)]
        command_id: Option<String>,
        commands: Vec<Command>,
        #[serde(default)]
        control: ControlInfo,
    },
    /// Delete by command id, or by the uuid returned from `add_command_set`.
    DeleteCommandSet {
        #[serde(default)]
        command_id: Option<String>,
        #[serde(default)]
        uuid: Option<Uuid>,
    },
    /// `DONE`, `WAIT`, `NEXT` or `RETRY`.
    TakeAction { action: String },
    FindStorage {
        #[serde(default)]
        filter: CommandFilter,
    },
    FilterStorage {
        #[serde(default)]
        filter: CommandFilter,
    },
    /// Receive connect/disconnect events for the device.
    Subscribe,
    Unsubscribe,
}

/// Envelope for client commands with optional authentication token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    pub token: Option<String>,
    /// Target device name; may be omitted when only one device is configured.
    #[serde(default)]
    pub device: Option<String>,
    #[serde(flatten)]
    pub cmd: ClientCommand,
}

/// Response sent to network clients over TCP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClientResponse {
    pub fn ok(result: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Unsolicited line pushed to a client, wrapping one commander callback.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub notification: CommanderEvent,
}

/// Entry of a `list_devices` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub connection: ConnectionId,
    pub connected: bool,
    pub has_perform_command: bool,
}
