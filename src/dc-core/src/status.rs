// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Closed vocabularies shared by the queue, the manager and its commanders.
//!
//! Every value has exactly one canonical wire name. Parsing an unknown name
//! is an error rather than a silent fallback.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ManagerError;

/// Phase of the command set currently driven by a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Idle, nothing in flight for this set.
    #[default]
    #[serde(rename = "WAIT")]
    Wait,
    /// Command bytes are being handed to the transport.
    #[serde(rename = "REQUEST_CMD")]
    RequestCmd,
    /// Written, waiting for the device to answer.
    #[serde(rename = "RECEIVE_WAIT_DATA")]
    ReceiveWaitData,
    /// Data arrived, waiting for the commander's verdict.
    #[serde(rename = "RECEIVE_WAIT_PROCESSING_DATA")]
    ReceiveWaitProcessingData,
    #[serde(rename = "RECEIVE_DATA_DONE")]
    ReceiveDataDone,
    #[serde(rename = "RECEIVE_WAIT_MORE_DATA")]
    ReceiveWaitMoreData,
    #[serde(rename = "RECEIVE_NEXT_FORCE")]
    ReceiveNextForce,
    #[serde(rename = "E_TIMEOUT")]
    ETimeout,
    #[serde(rename = "E_DATA_PART")]
    EDataPart,
    #[serde(rename = "E_UNHANDLING_DATA")]
    EUnhandlingData,
    #[serde(rename = "E_INCORRECT_DATA")]
    EIncorrectData,
    #[serde(rename = "E_RETRY_MAX")]
    ERetryMax,
    #[serde(rename = "E_UNEXPECTED")]
    EUnexpected,
    #[serde(rename = "E_DISCONNECTED_DEVICE")]
    EDisconnectedDevice,
    #[serde(rename = "E_NON_CMD")]
    ENonCmd,
    /// The current command asked to park the whole set for a while.
    #[serde(rename = "PROCESSING_DELEAY_COMMAND")]
    ProcessingDelayCommand,
    /// Deletion requested while the set was current; torn down on the next tick.
    #[serde(rename = "PROCESSING_DELETE_COMMAND")]
    ProcessingDeleteCommand,
    /// Frozen after an error until the commander intervenes.
    #[serde(rename = "WAIT_ERROR_HANDLING")]
    WaitErrorHandling,
}

impl OperationStatus {
    pub const ALL: [OperationStatus; 18] = [
        Self::Wait,
        Self::RequestCmd,
        Self::ReceiveWaitData,
        Self::ReceiveWaitProcessingData,
        Self::ReceiveDataDone,
        Self::ReceiveWaitMoreData,
        Self::ReceiveNextForce,
        Self::ETimeout,
        Self::EDataPart,
        Self::EUnhandlingData,
        Self::EIncorrectData,
        Self::ERetryMax,
        Self::EUnexpected,
        Self::EDisconnectedDevice,
        Self::ENonCmd,
        Self::ProcessingDelayCommand,
        Self::ProcessingDeleteCommand,
        Self::WaitErrorHandling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wait => "WAIT",
            Self::RequestCmd => "REQUEST_CMD",
            Self::ReceiveWaitData => "RECEIVE_WAIT_DATA",
            Self::ReceiveWaitProcessingData => "RECEIVE_WAIT_PROCESSING_DATA",
            Self::ReceiveDataDone => "RECEIVE_DATA_DONE",
            Self::ReceiveWaitMoreData => "RECEIVE_WAIT_MORE_DATA",
            Self::ReceiveNextForce => "RECEIVE_NEXT_FORCE",
            Self::ETimeout => "E_TIMEOUT",
            Self::EDataPart => "E_DATA_PART",
            Self::EUnhandlingData => "E_UNHANDLING_DATA",
            Self::EIncorrectData => "E_INCORRECT_DATA",
            Self::ERetryMax => "E_RETRY_MAX",
            Self::EUnexpected => "E_UNEXPECTED",
            Self::EDisconnectedDevice => "E_DISCONNECTED_DEVICE",
            Self::ENonCmd => "E_NON_CMD",
            Self::ProcessingDelayCommand => "PROCESSING_DELEAY_COMMAND",
            Self::ProcessingDeleteCommand => "PROCESSING_DELETE_COMMAND",
            Self::WaitErrorHandling => "WAIT_ERROR_HANDLING",
        }
    }

    /// A write is in flight and the manager must not transmit again.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::RequestCmd
                | Self::ReceiveWaitData
                | Self::ReceiveWaitProcessingData
                | Self::ReceiveWaitMoreData
        )
    }

    /// Error status an expired execution timer maps the current phase to.
    pub fn timeout_flavor(&self) -> OperationStatus {
        match self {
            Self::ReceiveWaitData => Self::ETimeout,
            Self::ReceiveWaitProcessingData => Self::EUnhandlingData,
            Self::ReceiveWaitMoreData => Self::EDataPart,
            _ => Self::EUnexpected,
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ManagerError::UnknownStatus(s.to_string()))
    }
}

/// Commander verdict on the data received for the active command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TakeAction {
    /// Accept the data and advance.
    Done,
    /// More data expected; keep the timer running.
    Wait,
    /// Advance regardless of completeness.
    Next,
    /// Re-transmit the current command.
    Retry,
}

impl fmt::Display for TakeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Done => "DONE",
            Self::Wait => "WAIT",
            Self::Next => "NEXT",
            Self::Retry => "RETRY",
        };
        f.write_str(s)
    }
}

impl FromStr for TakeAction {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DONE" | "ISOK" => Ok(Self::Done),
            "WAIT" => Ok(Self::Wait),
            "NEXT" => Ok(Self::Next),
            "RETRY" => Ok(Self::Retry),
            _ => Err(ManagerError::UnknownAction(s.to_string())),
        }
    }
}

/// Lifecycle notices delivered through `on_dc_message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageCode {
    #[serde(rename = "COMMANDSET_EXECUTION_START")]
    CommandSetExecutionStart,
    #[serde(rename = "COMMANDSET_EXECUTION_TERMINATE")]
    CommandSetExecutionTerminate,
    #[serde(rename = "COMMANDSET_MOVE_DELAYSET")]
    CommandSetMoveDelaySet,
    #[serde(rename = "COMMANDSET_DELETE")]
    CommandSetDelete,
    #[serde(rename = "ONE_AND_ONE_COMM")]
    OneAndOneComm,
}

/// Connection-level events broadcast to every attached commander.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_name", content = "message")]
pub enum DeviceEvent {
    #[serde(rename = "dcConnect")]
    Connect,
    #[serde(rename = "dcDisconnect")]
    Disconnect,
    #[serde(rename = "dcError")]
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names_round_trip() {
        for status in OperationStatus::ALL {
            assert_eq!(status.as_str().parse::<OperationStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let err = "RECEIVE_DONE".parse::<OperationStatus>().unwrap_err();
        assert!(matches!(err, ManagerError::UnknownStatus(ref s) if s == "RECEIVE_DONE"));
        assert!(serde_json::from_str::<OperationStatus>("\"IDLE\"").is_err());
    }

    #[test]
    fn test_timeout_flavor() {
        assert_eq!(
            OperationStatus::ReceiveWaitData.timeout_flavor(),
            OperationStatus::ETimeout
        );
        assert_eq!(
            OperationStatus::ReceiveWaitProcessingData.timeout_flavor(),
            OperationStatus::EUnhandlingData
        );
        assert_eq!(
            OperationStatus::ReceiveWaitMoreData.timeout_flavor(),
            OperationStatus::EDataPart
        );
        assert_eq!(
            OperationStatus::Wait.timeout_flavor(),
            OperationStatus::EUnexpected
        );
    }

    #[test]
    fn test_take_action_parsing() {
        assert_eq!("done".parse::<TakeAction>().unwrap(), TakeAction::Done);
        assert_eq!("isOk".parse::<TakeAction>().unwrap(), TakeAction::Done);
        assert_eq!(" Retry ".parse::<TakeAction>().unwrap(), TakeAction::Retry);
        assert_eq!("NEXT".parse::<TakeAction>().unwrap(), TakeAction::Next);
        assert!("skip".parse::<TakeAction>().is_err());
    }

    #[test]
    fn test_device_event_serialization() {
        let json = serde_json::to_value(DeviceEvent::Connect).unwrap();
        assert_eq!(json["event_name"], "dcConnect");
        let json = serde_json::to_value(DeviceEvent::Error("EIO".into())).unwrap();
        assert_eq!(json["event_name"], "dcError");
        assert_eq!(json["message"], "EIO");
    }
}
