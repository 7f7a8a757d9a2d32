// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use dc_core::{ConnectionId, DynResult, Transport, TransportEvents};

mod link;
mod loopback;
mod serial;
mod socket;

pub use loopback::LoopbackTransport;
pub use serial::SerialTransport;
pub use socket::SocketTransport;

/// Connection details for instantiating a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportAccess {
    Serial {
        path: String,
        #[serde(default = "default_baud")]
        baud: u32,
    },
    Socket {
        host: String,
        port: u16,
    },
    Loopback {
        name: String,
    },
}

fn default_baud() -> u32 {
    9600
}

impl TransportAccess {
    /// Registry name of the built-in transport serving this access method.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Serial { .. } => "serial",
            Self::Socket { .. } => "socket",
            Self::Loopback { .. } => "loopback",
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Self::Serial { path, .. } => ConnectionId::Serial { path: path.clone() },
            Self::Socket { host, port } => ConnectionId::Socket {
                host: host.clone(),
                port: *port,
            },
            Self::Loopback { name } => ConnectionId::Loopback { name: name.clone() },
        }
    }
}

pub type TransportFactory = fn(TransportAccess, TransportEvents) -> DynResult<Box<dyn Transport>>;

/// Context for registering and instantiating transports.
#[derive(Clone)]
pub struct TransportRegistry {
    factories: HashMap<String, TransportFactory>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a transport factory under a stable name (e.g. "serial").
    pub fn register_transport(&mut self, name: &str, factory: TransportFactory) {
        let key = normalize_name(name);
        self.factories.insert(key, factory);
    }

    pub fn is_transport_registered(&self, name: &str) -> bool {
        let key = normalize_name(name);
        self.factories.contains_key(&key)
    }

    /// List registered transport names.
    pub fn registered_transports(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate a transport. It is not connected yet.
    pub fn build_transport(
        &self,
        name: &str,
        access: TransportAccess,
        events: TransportEvents,
    ) -> DynResult<Box<dyn Transport>> {
        let key = normalize_name(name);
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| format!("Unknown transport: {}", name))?;
        factory(access, events)
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Register all built-in transports on a registry.
pub fn register_builtin_transports_on(registry: &mut TransportRegistry) {
    registry.register_transport("serial", serial_factory);
    registry.register_transport("socket", socket_factory);
    registry.register_transport("loopback", loopback_factory);
}

fn serial_factory(access: TransportAccess, events: TransportEvents) -> DynResult<Box<dyn Transport>> {
    match access {
        TransportAccess::Serial { path, baud } => {
            Ok(Box::new(SerialTransport::new(&path, baud, events)))
        }
        _ => Err("serial transport requires serial access".into()),
    }
}

fn socket_factory(access: TransportAccess, events: TransportEvents) -> DynResult<Box<dyn Transport>> {
    match access {
        TransportAccess::Socket { host, port } => {
            Ok(Box::new(SocketTransport::new(&host, port, events)))
        }
        _ => Err("socket transport requires socket access".into()),
    }
}

fn loopback_factory(
    access: TransportAccess,
    events: TransportEvents,
) -> DynResult<Box<dyn Transport>> {
    match access {
        TransportAccess::Loopback { name } => Ok(Box::new(LoopbackTransport::new(&name, events))),
        _ => Err("loopback transport requires loopback access".into()),
    }
}
