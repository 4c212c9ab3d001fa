//! dfu-discovery
//!
//! Pluggable discovery for USB devices in DFU mode. Speaks the discovery
//! protocol on stdin/stdout; logs go to stderr.

use agent::config::{AgentConfig, SyncStrategy};
use agent::server::DiscoveryServer;
use agent::sync::{SyncEngine, build_snapshot};
use agent::usb::LibusbBackend;
use anyhow::{Context, Result};
use clap::Parser;
use common::{DeviceEnumerator, setup_logging};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "dfu-discovery")]
#[command(
    author,
    version,
    about = "Pluggable discovery for USB devices in DFU mode"
)]
#[command(long_about = "
Reports USB devices in DFU mode to a parent process using the
pluggable-discovery protocol (commands on stdin, JSON events on stdout).

EXAMPLES:
    # Run as a discovery (normally started by the parent process)
    dfu-discovery

    # Print the DFU ports currently attached and exit
    dfu-discovery --list

    # Poll instead of using hotplug events
    dfu-discovery --strategy poll

CONFIGURATION:
    The agent looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/dfu-discovery/agent.toml
    3. /etc/dfu-discovery/agent.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Print the attached DFU ports as JSON and exit
    #[arg(long)]
    list: bool,

    /// Change source used while synchronizing
    #[arg(short, long, value_enum)]
    strategy: Option<SyncStrategy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = AgentConfig::default();
        let path = AgentConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        eprintln!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        let path = PathBuf::from(shellexpand::tilde(path).as_ref());
        AgentConfig::load(Some(path)).context("Failed to load configuration")?
    } else {
        AgentConfig::load_or_default()
    };

    if let Some(strategy) = args.strategy {
        config.sync.strategy = strategy;
    }

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.agent.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("dfu-discovery v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let backend = Arc::new(LibusbBackend::new(config.usb.filters.clone()));

    if args.list {
        return list_mode(&backend);
    }

    let source = agent::build_change_source(&config.sync, Arc::clone(&backend));
    let engine = SyncEngine::new(backend, source);
    let server = DiscoveryServer::new(engine);

    server
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;

    info!("dfu-discovery exiting");
    Ok(())
}

/// Scan once and print the ports
fn list_mode(backend: &LibusbBackend) -> Result<()> {
    backend.open().context("Failed to open USB backend")?;
    let records = backend.enumerate();
    backend.close();

    let snapshot = build_snapshot(&records.context("Failed to enumerate USB devices")?);
    let mut ports: Vec<_> = snapshot.into_values().collect();
    ports.sort_by(|a, b| a.address.cmp(&b.address));

    println!(
        "{}",
        serde_json::to_string_pretty(&ports).context("Failed to encode ports")?
    );
    Ok(())
}
