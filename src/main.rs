//! CN8PT bridge daemon
//!
//! Connects to one controller, keeps its control points synchronized and logs every
//! update under the configured prefix (`cn8pt:temperature`, ...).
//!
//! # Usage
//!
//! ```bash
//! # Real controller
//! cn8pt_bridge --address 10.66.50.95 --port 2000
//!
//! # Built-in simulator on a local port
//! cn8pt_bridge --simulate
//!
//! # Show the effective configuration
//! cn8pt_bridge --config cn8pt.toml --print-config
//! ```
//!
//! While running, lines on stdin of the form `name=value` write a control point
//! (`setpoint=30`, `output_mode=pid`) and `snapshot` prints every point as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use cn8pt_bridge::bridge::Cn8ptBridge;
use cn8pt_bridge::config::Settings;
use cn8pt_bridge::point::{PointId, PointValue};
use cn8pt_bridge::registry::Registry;
use cn8pt_bridge::scheduler::{BridgeHandle, Scheduler};
use cn8pt_bridge::sim::SimulatedCn8pt;
use cn8pt_bridge::transport::{Session, SessionConfig, TcpConnector};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cn8pt_bridge")]
#[command(about = "Control-point bridge for Omega CN8PT temperature controllers")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Controller address (overrides the configuration)
    #[arg(long)]
    address: Option<String>,

    /// Controller TCP port (overrides the configuration)
    #[arg(long)]
    port: Option<u16>,

    /// Prefix for published control point names (overrides the configuration)
    #[arg(long)]
    prefix: Option<String>,

    /// Run against a built-in simulated controller instead of real hardware
    #[arg(long)]
    simulate: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(address) = cli.address {
        settings.device.address = address;
    }
    if let Some(port) = cli.port {
        settings.device.port = port;
    }
    if let Some(prefix) = cli.prefix {
        settings.application.prefix = prefix;
    }
    settings.validate().context("Invalid command-line override")?;

    if cli.print_config {
        print!(
            "{}",
            toml::to_string_pretty(&settings).context("Failed to render configuration")?
        );
        return Ok(());
    }

    init_logging(&settings);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting CN8PT bridge");

    if cli.simulate {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind simulator port")?;
        let local = listener.local_addr()?;
        settings.device.address = local.ip().to_string();
        settings.device.port = local.port();
        tokio::spawn(async move {
            if let Err(e) = SimulatedCn8pt::new().serve(listener).await {
                error!(error = %e, "simulator stopped");
            }
        });
    }

    let connector = TcpConnector::new(settings.device.address.clone(), settings.device.port);
    let session = Session::with_config(connector, SessionConfig::from(&settings.device));
    let bridge = Arc::new(Cn8ptBridge::new(Arc::new(session)));
    info!(
        address = %settings.device.address,
        port = settings.device.port,
        "Bridging controller"
    );

    publish_updates(bridge.registry(), &settings.application.prefix);
    let (handle, scheduler) = Scheduler::new(bridge, &settings).spawn();
    tokio::spawn(console(handle.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, shutting down");

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "scheduler already stopped");
    }
    scheduler.await.context("Scheduler task panicked")?;
    Ok(())
}

fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.application.log_level));
    if settings.application.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Log every value change of every point under its published name.
/// Log every value change under its prefixed name. Subscribes before the
/// scheduler starts so startup reads are reported too.
fn publish_updates(registry: &Registry, prefix: &str) {
    for descriptor in registry.descriptors() {
        let mut rx = registry.subscribe(descriptor.id);
        let name = format!("{}{}", prefix, descriptor.name);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let value = rx.borrow_and_update().clone();
                match descriptor.label_of(&value) {
                    Some(label) => info!(pv = %name, %value, label, "update"),
                    None => info!(pv = %name, %value, "update"),
                }
            }
        });
    }
}

/// Apply `name=value` lines from stdin until it closes.
async fn console(handle: BridgeHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "snapshot" {
            match serde_json::to_string_pretty(&handle.snapshot()) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!(error = %e, "cannot render snapshot"),
            }
            continue;
        }
        let Some((name, text)) = line.split_once('=') else {
            warn!(input = line, "expected name=value or snapshot");
            continue;
        };
        let result = async {
            let id = PointId::from_name(name.trim())?;
            let value = PointValue::parse_for(id, text)?;
            handle.write_point(id, value).await
        }
        .await;
        match result {
            Ok(()) => info!(point = name.trim(), "write accepted"),
            Err(e) => warn!(point = name.trim(), error = %e, "write failed"),
        }
    }
}
