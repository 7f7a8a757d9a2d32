// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;
mod listener;
mod manager_handle;
mod manager_task;
mod registry;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use dc_app::{init_logging, ConfigFile};
use dc_core::DynResult;
use dc_protocol::SimpleTokenValidator;
use dc_transport::{register_builtin_transports_on, TransportAccess, TransportRegistry};

use config::ServerConfig;
use registry::ManagerRegistry;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - device command scheduler daemon");

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// IP address for the JSON TCP listener
    #[arg(short = 'l', long = "listen")]
    listen: Option<IpAddr>,
    /// Port for the JSON TCP listener
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,
}

fn describe_access(access: &TransportAccess) -> String {
    match access {
        TransportAccess::Serial { path, baud } => format!("serial {} @ {} baud", path, baud),
        TransportAccess::Socket { host, port } => format!("socket {}:{}", host, port),
        TransportAccess::Loopback { name } => format!("loopback {}", name),
    }
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    if *shutdown_rx.borrow() {
        return;
    }
    while shutdown_rx.changed().await.is_ok() {
        if *shutdown_rx.borrow() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_combined_toml());
        return Ok(());
    }

    let (cfg, config_path) = if let Some(ref path) = cli.config {
        let cfg = ServerConfig::load_from_file(path)?;
        (cfg, Some(path.clone()))
    } else {
        ServerConfig::load_from_default_paths()?
    };
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(
        cli.log_level
            .as_deref()
            .or(cfg.general.log_level.as_deref()),
    );

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    if cfg.devices.is_empty() {
        return Err(
            "No devices configured. Add [[dc-server.devices]] entries to the config file.".into(),
        );
    }

    let mut transports = TransportRegistry::new();
    register_builtin_transports_on(&mut transports);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut registry = ManagerRegistry::new(transports, shutdown_rx.clone());
    for device in &cfg.devices {
        info!(
            "Starting device {} ({})",
            device.name,
            describe_access(&device.access)
        );
        let behavior = device.effective_behavior(&cfg.behavior);
        registry.get_or_spawn(&device.name, device.access.clone(), behavior)?;
    }

    info!("{} device manager(s) running", registry.len());

    let mut task_handles: Vec<JoinHandle<()>> = registry.take_tasks();
    let registry = Arc::new(registry);

    if cfg.listen.enabled {
        let listen_ip = cli.listen.unwrap_or(cfg.listen.listen);
        let listen_port = cli.port.unwrap_or(cfg.listen.port);
        let listen_addr = SocketAddr::from((listen_ip, listen_port));
        let validator = Arc::new(SimpleTokenValidator::new(
            cfg.listen.auth.tokens.iter().cloned(),
        ));
        let listener_registry = Arc::clone(&registry);
        let listener_shutdown_rx = shutdown_rx.clone();
        task_handles.push(tokio::spawn(async move {
            if let Err(e) = listener::run_listener(
                listen_addr,
                listener_registry,
                validator,
                listener_shutdown_rx,
            )
            .await
            {
                error!("Listener error: {:?}", e);
            }
        }));
    }

    signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down");
    let _ = shutdown_tx.send(true);
    drop(registry);
    tokio::time::sleep(Duration::from_millis(400)).await;

    for handle in &task_handles {
        if !handle.is_finished() {
            handle.abort();
        }
    }
    for handle in task_handles {
        let _ = handle.await;
    }
    Ok(())
}
