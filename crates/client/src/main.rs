//! usbrpc Client
//!
//! Drives a remote usbrpc server: lists its USB devices, looks for an Apple
//! device in recovery mode, or walks a device through the full call sequence.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client::commands;
use client::config::{self, ClientConfig};
use common::{RemoteUsb, setup_logging};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "usbrpc-client")]
#[command(author, version, about = "usbrpc client - run USB operations on a remote host")]
#[command(long_about = "
Connects to a usbrpc server and runs USB device operations on the devices
attached to that host.

EXAMPLES:
    # List the server's devices
    usbrpc-client 192.168.1.20 9999 list

    # Look for an Apple device in recovery or DFU mode
    usbrpc-client 192.168.1.20 9999 find-idevice

    # Open the first device and claim interface 0
    usbrpc-client 192.168.1.20 9999 demo --interface 0

CONFIGURATION:
    The client looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usbrpc/client.toml
    3. /etc/usbrpc/client.toml
    4. Built-in defaults
")]
struct Args {
    /// Server host name or address
    #[arg(value_name = "HOST", required_unless_present = "save_config")]
    host: Option<String>,

    /// Server port
    #[arg(value_name = "PORT", required_unless_present = "save_config")]
    port: Option<u16>,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the server's devices and show the ids of the first one
    List,
    /// Look for an Apple device in recovery or DFU mode
    FindIdevice,
    /// Open the first device, claim and release an interface, then close it
    Demo {
        /// Interface number to claim
        #[arg(short, long, default_value_t = 0)]
        interface: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = ClientConfig::default();
        let path = ClientConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        ClientConfig::load(Some(config::expand_path(path)))
            .context("Failed to load configuration")?
    } else {
        ClientConfig::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.client.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    let (Some(host), Some(port)) = (args.host, args.port) else {
        anyhow::bail!("Usage: usbrpc-client <HOST> <PORT> [COMMAND]");
    };

    info!("usbrpc client v{}", env!("CARGO_PKG_VERSION"));

    let mut usb = RemoteUsb::connect(
        (host.as_str(), port),
        config.client.timeouts(),
        config.client.connect_timeout(),
    )
    .await
    .with_context(|| format!("Failed to connect to {}:{}", host, port))?;

    let mut out = std::io::stdout().lock();
    match args.command.unwrap_or(Command::List) {
        Command::List => {
            commands::list(&mut usb, &mut out).await?;
        }
        Command::FindIdevice => {
            writeln!(out, "[*] Looking on {} for recovery device...", host)?;
            commands::find_idevice(&mut usb, &mut out).await?;
        }
        Command::Demo { interface } => {
            commands::demo(&mut usb, interface, &mut out).await?;
        }
    }
    out.flush()?;

    usb.disconnect().await.context("Failed to close connection")?;
    Ok(())
}
