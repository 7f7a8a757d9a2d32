// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod command;
pub mod commander;
pub mod controller;
pub mod error;
pub mod request;
pub mod status;
pub mod transport;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use command::{Command, CommandSet, ControlInfo, Rank, EMERGENCY_RANK};
pub use commander::{ChannelCommander, Commander, CommanderEvent, CommanderRef, DcErrorInfo};
pub use controller::{CommandFilter, Manager, ManagerConfig, ManagerSnapshot, StorageSnapshot};
pub use error::{ManagerError, ManagerResult};
pub use request::{ManagerCommand, ManagerReply, ManagerRequest};
pub use status::{DeviceEvent, MessageCode, OperationStatus, TakeAction};
pub use transport::{ConnectionId, Transport, TransportEvent, TransportEvents};
