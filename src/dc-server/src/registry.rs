// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Managers keyed by connection identity.
//!
//! Exactly one manager task exists per physical channel. Asking for a
//! connection that is already served returns the existing handle, so two
//! configured names for the same port share one queue.

use std::collections::HashMap;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use dc_app::normalize_name;
use dc_core::{ConnectionId, DynResult, ManagerSnapshot};
use dc_transport::{TransportAccess, TransportRegistry};

use crate::config::BehaviorConfig;
use crate::manager_handle::ManagerHandle;
use crate::manager_task::{run_manager_task, ManagerTaskConfig};

const MANAGER_TASK_CHANNEL_BUFFER: usize = 32;

pub struct ManagerRegistry {
    transports: TransportRegistry,
    shutdown_rx: watch::Receiver<bool>,
    by_connection: HashMap<ConnectionId, ManagerHandle>,
    /// Normalized device name to connection.
    names: HashMap<String, ConnectionId>,
    tasks: Vec<JoinHandle<()>>,
}

impl ManagerRegistry {
    pub fn new(transports: TransportRegistry, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            transports,
            shutdown_rx,
            by_connection: HashMap::new(),
            names: HashMap::new(),
            tasks: Vec::new(),
        }
    }

    /// Return the manager serving `access`, spawning its task on first use.
    ///
    /// `name` becomes an alias for the connection either way.
    pub fn get_or_spawn(
        &mut self,
        name: &str,
        access: TransportAccess,
        behavior: &BehaviorConfig,
    ) -> DynResult<ManagerHandle> {
        let key = normalize_name(name);
        if key.is_empty() {
            return Err(format!("Invalid device name '{}'", name).into());
        }
        let connection = access.connection_id();
        if let Some(existing) = self.names.get(&key) {
            if existing != &connection {
                return Err(format!(
                    "Device name '{}' already refers to {}",
                    name, existing
                )
                .into());
            }
        }

        if let Some(handle) = self.by_connection.get(&connection) {
            self.names.insert(key, connection);
            return Ok(handle.clone());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = self
            .transports
            .build_transport(access.kind(), access, events_tx)?;

        let (tx, rx) = mpsc::channel(MANAGER_TASK_CHANNEL_BUFFER);
        let (state_tx, state_rx) = watch::channel(ManagerSnapshot::offline(connection.clone()));
        let config = ManagerTaskConfig {
            name: name.to_string(),
            manager: behavior.manager_config(),
            reconnect: behavior.reconnect_supervisor(),
        };
        let shutdown_rx = self.shutdown_rx.clone();
        let task_name = name.to_string();
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) =
                run_manager_task(config, transport, events_rx, rx, state_tx, shutdown_rx).await
            {
                error!("Manager task {} error: {:?}", task_name, e);
            }
        }));

        let handle = ManagerHandle {
            name: name.to_string(),
            connection: connection.clone(),
            tx,
            state_rx,
        };
        info!("Registered device {} on {}", name, connection);
        self.by_connection.insert(connection.clone(), handle.clone());
        self.names.insert(key, connection);
        Ok(handle)
    }

    pub fn get(&self, connection: &ConnectionId) -> Option<&ManagerHandle> {
        self.by_connection.get(connection)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&ManagerHandle> {
        self.names
            .get(&normalize_name(name))
            .and_then(|connection| self.by_connection.get(connection))
    }

    /// Pick the target of a client request. The device may be omitted only
    /// when exactly one manager is running.
    pub fn resolve(&self, device: Option<&str>) -> Result<&ManagerHandle, String> {
        match device {
            Some(name) => self.find_by_name(name).ok_or_else(|| {
                format!(
                    "Unknown device: {} (available: {})",
                    name,
                    self.device_names().join(", ")
                )
            }),
            None => {
                let mut handles = self.by_connection.values();
                match (handles.next(), handles.next()) {
                    (Some(handle), None) => Ok(handle),
                    (None, _) => Err("No devices configured".to_string()),
                    _ => Err(format!(
                        "Device must be specified (available: {})",
                        self.device_names().join(", ")
                    )),
                }
            }
        }
    }

    /// Handles sorted by device name.
    pub fn handles(&self) -> Vec<&ManagerHandle> {
        let mut handles: Vec<&ManagerHandle> = self.by_connection.values().collect();
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        handles
    }

    pub fn device_names(&self) -> Vec<String> {
        self.handles().iter().map(|h| h.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_connection.len()
    }

    /// Hand the spawned task handles to the caller for shutdown.
    pub fn take_tasks(&mut self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut self.tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_transport::register_builtin_transports_on;

    fn registry() -> (ManagerRegistry, watch::Sender<bool>) {
        let mut transports = TransportRegistry::new();
        register_builtin_transports_on(&mut transports);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (ManagerRegistry::new(transports, shutdown_rx), shutdown_tx)
    }

    fn loopback(name: &str) -> TransportAccess {
        TransportAccess::Loopback { name: name.into() }
    }

    #[tokio::test]
    async fn test_same_connection_shares_one_manager() {
        let (mut registry, _shutdown) = registry();
        let behavior = BehaviorConfig::default();

        let first = registry
            .get_or_spawn("Bench", loopback("bench"), &behavior)
            .unwrap();
        let alias = registry
            .get_or_spawn("bench-alias", loopback("bench"), &behavior)
            .unwrap();
        assert_eq!(first.connection, alias.connection);
        assert!(first.tx.same_channel(&alias.tx));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.take_tasks().len(), 1);

        assert!(registry.find_by_name("BENCH").is_some());
        assert!(registry.find_by_name("bench_alias").is_some());
        assert!(registry.get(&loopback("bench").connection_id()).is_some());
    }

    #[tokio::test]
    async fn test_name_cannot_move_to_another_connection() {
        let (mut registry, _shutdown) = registry();
        let behavior = BehaviorConfig::default();
        registry
            .get_or_spawn("plc", loopback("a"), &behavior)
            .unwrap();
        assert!(registry
            .get_or_spawn("plc", loopback("b"), &behavior)
            .is_err());
        assert!(registry.get_or_spawn("--", loopback("c"), &behavior).is_err());
    }

    #[tokio::test]
    async fn test_resolve_default_device() {
        let (mut registry, _shutdown) = registry();
        let behavior = BehaviorConfig::default();
        assert!(registry.resolve(None).is_err());

        registry
            .get_or_spawn("alpha", loopback("alpha"), &behavior)
            .unwrap();
        assert_eq!(registry.resolve(None).unwrap().name, "alpha");

        registry
            .get_or_spawn("beta", loopback("beta"), &behavior)
            .unwrap();
        let err = registry.resolve(None).unwrap_err();
        assert!(err.contains("alpha, beta"));
        assert_eq!(registry.resolve(Some("Beta")).unwrap().name, "beta");
        assert!(registry.resolve(Some("gamma")).is_err());
    }

    #[tokio::test]
    async fn test_tasks_stop_on_shutdown() {
        let (mut registry, shutdown_tx) = registry();
        let handle = registry
            .get_or_spawn("bench", loopback("bench"), &BehaviorConfig::default())
            .unwrap();
        let mut state_rx = handle.state_rx.clone();
        state_rx.wait_for(|s| s.connected).await.unwrap();

        shutdown_tx.send(true).unwrap();
        for task in registry.take_tasks() {
            task.await.unwrap();
        }
        assert!(!handle.snapshot().connected);
    }
}
