// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Byte-level transport contract consumed by the manager.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::DynResult;

/// Canonical identity of a device connection.
///
/// Managers are registered under this key, one per physical channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionId {
    Serial { path: String },
    Socket { host: String, port: u16 },
    Loopback { name: String },
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { path } => write!(f, "serial:{}", path),
            Self::Socket { host, port } => write!(f, "socket:{}:{}", host, port),
            Self::Loopback { name } => write!(f, "loopback:{}", name),
        }
    }
}

/// Notification emitted by a transport towards its manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Error(String),
    Data(Vec<u8>),
}

/// Sending side handed to a transport at construction.
pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = DynResult<T>> + Send + 'a>>;

/// A byte channel to one device.
///
/// Inbound bytes and lifecycle changes are reported through the
/// [`TransportEvents`] sender the transport was built with. `is_connected`
/// is the authoritative liveness signal.
pub trait Transport: Send {
    fn connection_id(&self) -> &ConnectionId;

    fn connect<'a>(&'a mut self) -> TransportFuture<'a, ()>;

    /// Resolves once the medium has accepted the payload.
    fn write<'a>(&'a mut self, payload: &'a [u8]) -> TransportFuture<'a, ()>;

    /// Best-effort teardown.
    fn disconnect<'a>(&'a mut self) -> TransportFuture<'a, ()>;

    fn is_connected(&self) -> bool;
}
