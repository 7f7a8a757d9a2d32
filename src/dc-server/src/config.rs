// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for dc-server.
//!
//! Config is loaded from the `[dc-server]` section of `dc-rs.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./dc-rs.toml`
//! 3. `~/.config/dc-rs/dc-rs.toml`
//! 4. `/etc/dc-rs/dc-rs.toml`

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dc_app::{normalize_name, ConfigFile};
use dc_core::controller::{ExponentialBackoff, FixedDelay, ReconnectSupervisor};
use dc_core::ManagerConfig;
use dc_transport::TransportAccess;

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Scheduling defaults shared by every device
    pub behavior: BehaviorConfig,
    /// TCP listener configuration
    pub listen: ListenConfig,
    /// Devices served by this daemon, one manager each
    pub devices: Vec<DeviceConfig>,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

/// Retry, timeout and reconnect behavior of a manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Retry budget per command
    pub max_retries: u32,
    /// Pause before a retried command is re-transmitted, in milliseconds
    pub retry_delay_ms: u64,
    /// Count execution timeouts against the retry budget
    pub retry_on_timeout: bool,
    /// Reconnect after the device drops
    pub reconnect: bool,
    /// First reconnect delay in milliseconds, doubled per attempt
    pub reconnect_base_delay_ms: u64,
    /// Upper bound for the reconnect delay in milliseconds
    pub reconnect_max_delay_ms: u64,
    /// Give up after this many reconnect attempts (unset = never)
    pub reconnect_max_attempts: Option<u32>,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 30,
            retry_on_timeout: false,
            reconnect: true,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 20_000,
            reconnect_max_attempts: None,
        }
    }
}

impl BehaviorConfig {
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            retry: FixedDelay::new(
                self.max_retries,
                Duration::from_millis(self.retry_delay_ms),
            ),
            retry_on_timeout: self.retry_on_timeout,
        }
    }

    pub fn reconnect_supervisor(&self) -> ReconnectSupervisor {
        ReconnectSupervisor::new(
            ExponentialBackoff::new(
                self.reconnect_max_attempts.unwrap_or(u32::MAX),
                Duration::from_millis(self.reconnect_base_delay_ms),
                Duration::from_millis(self.reconnect_max_delay_ms),
            ),
            self.reconnect,
        )
    }

    fn validate(&self, path: &str) -> Result<(), String> {
        if self.max_retries == 0 {
            return Err(format!("{path}.max_retries must be > 0"));
        }
        if self.retry_delay_ms == 0 {
            return Err(format!("{path}.retry_delay_ms must be > 0"));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err(format!("{path}.reconnect_base_delay_ms must be > 0"));
        }
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err(format!(
                "{path}.reconnect_max_delay_ms must be >= reconnect_base_delay_ms"
            ));
        }
        if self.reconnect_max_attempts == Some(0) {
            return Err(format!("{path}.reconnect_max_attempts must be > 0 when set"));
        }
        Ok(())
    }
}

/// One device connection.
///
/// Each entry in `[[dc-server.devices]]` becomes one manager task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Name clients use to address the device.
    pub name: String,
    /// How to reach the device.
    pub access: TransportAccess,
    /// Per-device override of `[behavior]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<BehaviorConfig>,
}

impl DeviceConfig {
    pub fn effective_behavior<'a>(&'a self, defaults: &'a BehaviorConfig) -> &'a BehaviorConfig {
        self.behavior.as_ref().unwrap_or(defaults)
    }
}

/// TCP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Whether the listener is enabled
    pub enabled: bool,
    /// IP address to listen on
    pub listen: IpAddr,
    /// TCP port to listen on
    pub port: u16,
    /// Authentication configuration
    pub auth: AuthConfig,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            port: 4560,
            auth: AuthConfig::default(),
        }
    }
}

/// Authentication configuration for the TCP listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Valid authentication tokens (empty = no auth required)
    pub tokens: Vec<String>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;
        self.behavior.validate("[behavior]")?;

        if self.listen.enabled && self.listen.port == 0 {
            return Err("[listen].port must be > 0".to_string());
        }
        validate_tokens("[listen.auth].tokens", &self.listen.auth.tokens)?;

        let mut names = HashSet::new();
        let mut connections = HashSet::new();
        for device in &self.devices {
            let key = normalize_name(&device.name);
            if key.is_empty() {
                return Err(format!(
                    "[[devices]].name '{}' must contain at least one alphanumeric character",
                    device.name
                ));
            }
            if !names.insert(key) {
                return Err(format!("[[devices]].name '{}' is duplicated", device.name));
            }
            validate_access(&device.name, &device.access)?;
            if !connections.insert(device.access.connection_id()) {
                return Err(format!(
                    "device '{}' reuses connection {} of another device",
                    device.name,
                    device.access.connection_id()
                ));
            }
            if let Some(behavior) = &device.behavior {
                behavior.validate(&format!("[devices.{}.behavior]", device.name))?;
            }
        }
        Ok(())
    }

    /// Generate an example configuration wrapped under the `[dc-server]`
    /// section header, suitable for use in a combined `dc-rs.toml` file.
    pub fn example_combined_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "dc-server")]
            inner: ServerConfig,
        }
        let example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            behavior: BehaviorConfig::default(),
            listen: ListenConfig::default(),
            devices: vec![
                DeviceConfig {
                    name: "bench".to_string(),
                    access: TransportAccess::Loopback {
                        name: "bench".to_string(),
                    },
                    behavior: None,
                },
                DeviceConfig {
                    name: "plc".to_string(),
                    access: TransportAccess::Serial {
                        path: "/dev/ttyUSB0".to_string(),
                        baud: 9600,
                    },
                    behavior: Some(BehaviorConfig {
                        retry_on_timeout: true,
                        ..BehaviorConfig::default()
                    }),
                },
            ],
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

fn validate_access(device: &str, access: &TransportAccess) -> Result<(), String> {
    match access {
        TransportAccess::Serial { path, baud } => {
            if path.trim().is_empty() {
                return Err(format!("device '{device}': serial path must be set"));
            }
            if *baud == 0 {
                return Err(format!("device '{device}': serial baud must be > 0"));
            }
        }
        TransportAccess::Socket { host, port } => {
            if host.trim().is_empty() {
                return Err(format!("device '{device}': socket host must be set"));
            }
            if *port == 0 {
                return Err(format!("device '{device}': socket port must be > 0"));
            }
        }
        TransportAccess::Loopback { name } => {
            if name.trim().is_empty() {
                return Err(format!("device '{device}': loopback name must be set"));
            }
        }
    }
    Ok(())
}

fn validate_tokens(path: &str, tokens: &[String]) -> Result<(), String> {
    if tokens.iter().any(|t| t.trim().is_empty()) {
        return Err(format!("{path} must not contain empty tokens"));
    }
    Ok(())
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "dc-server"
    }
}
