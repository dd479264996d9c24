//! usbrpc Server
//!
//! Exposes the USB devices attached to this host over TCP so that a client
//! without hardware access can run device operations remotely.

use anyhow::{Context, Result};
use clap::Parser;
use common::{UsbBridge, UsbCommand, create_usb_bridge, setup_logging, spawn_usb_worker};
use server::config::{self, ServerConfig};
use server::{RpcServer, RusbBackend};
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "usbrpc-server")]
#[command(author, version, about = "usbrpc server - run USB operations for remote clients")]
#[command(long_about = "
Serves USB device operations (enumerate, read descriptors, open, claim and
release interfaces) to remote clients over a plain TCP connection.

EXAMPLES:
    # Run with default config (listens on 0.0.0.0:9999)
    usbrpc-server

    # Serve a single client and exit
    usbrpc-server --once --bind 127.0.0.1:9999

    # List USB devices without starting server
    usbrpc-server --list-devices

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usbrpc/server.toml
    3. /etc/usbrpc/server.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Address to listen on (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// Serve one connection, then exit
    #[arg(long)]
    once: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = ServerConfig::default();
        let path = ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        ServerConfig::load(Some(config::expand_path(path)))
            .context("Failed to load configuration")?
    } else {
        ServerConfig::load_or_default()
    };
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usbrpc server v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let (usb_bridge, worker) = create_usb_bridge();
    let usb_worker_handle = spawn_usb_worker(worker, RusbBackend::new(config.usb.filters.clone()))
        .context("Failed to spawn USB worker thread")?;

    let result = if args.list_devices {
        list_devices_mode(usb_bridge.clone()).await
    } else {
        run_server(&config, usb_bridge.clone(), args.once).await
    };

    info!("Shutting down USB subsystem...");
    if let Err(e) = shutdown_usb_worker(usb_bridge).await {
        error!("Error shutting down USB worker: {:#}", e);
    }
    if let Err(e) = usb_worker_handle.join() {
        error!("USB worker thread panicked: {:?}", e);
    }

    result
}

/// List USB devices and exit
async fn list_devices_mode(usb_bridge: UsbBridge) -> Result<()> {
    info!("Listing USB devices...");

    let devices = usb_bridge
        .request(|response| UsbCommand::ListDevices { response })
        .await
        .context("USB worker unavailable")?
        .context("Failed to enumerate devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in devices {
        let descriptor = usb_bridge
            .request(|response| UsbCommand::GetDescriptor {
                session_id: device.session_id,
                response,
            })
            .await
            .context("USB worker unavailable")?;

        match descriptor {
            Ok(desc) => println!(
                "  Bus {:03} Device {:03}: ID {:04x}:{:04x} class {:#04x} ({} configuration(s))",
                device.bus_number,
                device.device_address,
                desc.vendor_id,
                desc.product_id,
                desc.device_class,
                desc.num_configurations
            ),
            Err(e) => println!(
                "  Bus {:03} Device {:03}: descriptor unavailable ({})",
                device.bus_number, device.device_address, e
            ),
        }
    }

    Ok(())
}

/// Accept clients until Ctrl+C (or after one client with `--once`)
async fn run_server(config: &ServerConfig, usb_bridge: UsbBridge, once: bool) -> Result<()> {
    let server = RpcServer::bind(
        &config.server.bind_addr,
        usb_bridge,
        config.server.timeouts(),
        config.server.max_sessions,
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!("Error waiting for Ctrl+C: {}", e),
        }
    });

    if once {
        info!("Serving a single connection");
        server.serve_one(shutdown_rx).await
    } else {
        info!(
            "Serving up to {} connection(s) at a time, press Ctrl+C to shutdown",
            config.server.max_sessions
        );
        server.run(shutdown_rx).await
    }
}

/// Shutdown USB worker thread gracefully
async fn shutdown_usb_worker(usb_bridge: UsbBridge) -> Result<()> {
    usb_bridge
        .shutdown()
        .await
        .context("Failed to send Shutdown command")?;
    Ok(())
}
