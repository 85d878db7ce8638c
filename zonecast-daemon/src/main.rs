//! zonecast daemon - beacon sighting gateway
//!
//! Receives proximity-beacon sightings from a scan source, keeps only the
//! configured hotel beacons and relays each one to every connected client.

use std::fs::File;
use std::io::BufReader;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use zonecast_broadcaster::Framing;
use zonecast_daemon::config::GatewayConfig;
use zonecast_daemon::gateway::Gateway;
use zonecast_daemon::scanner::{ReplaySource, ScanSource, SimulatedSource};

#[derive(Parser, Debug)]
#[command(name = "zonecast-daemon", version, about = "Relay beacon sightings to connected listeners")]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to listen on
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Message framing: raw, lines or websocket
    #[arg(long)]
    framing: Option<Framing>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    source: Option<SourceCommand>,
}

#[derive(Subcommand, Debug)]
enum SourceCommand {
    /// Replay newline-delimited JSON sightings from a file or stdin
    Replay {
        /// Input file (stdin when omitted)
        file: Option<PathBuf>,

        /// Delay between records in milliseconds
        #[arg(long)]
        pace_ms: Option<u64>,
    },
    /// Generate sightings for the configured beacon names
    Simulate {
        /// Milliseconds between sightings
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

fn build_source(command: Option<SourceCommand>, config: &GatewayConfig) -> Result<Box<dyn ScanSource>> {
    let source: Box<dyn ScanSource> = match command {
        None => Box::new(ReplaySource::stdin()),
        Some(SourceCommand::Replay { file, pace_ms }) => {
            let mut source = match file {
                Some(path) => {
                    let file = File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
                    ReplaySource::new(Box::new(BufReader::new(file)))
                }
                None => ReplaySource::stdin(),
            };
            if let Some(ms) = pace_ms {
                source = source.with_pace(Duration::from_millis(ms));
            }
            Box::new(source)
        }
        Some(SourceCommand::Simulate { interval_ms }) => Box::new(SimulatedSource::new(
            config.simulation.names.clone(),
            Duration::from_millis(interval_ms.unwrap_or(config.simulation.interval_ms)),
        )),
    };
    Ok(source)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .with_level(true)
        .init();

    info!("Starting zonecast daemon v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => GatewayConfig::load_from(path),
        None => GatewayConfig::load(),
    }
    .context("Failed to load configuration")?;
    info!("Configuration loaded from {}", config.config_path.display());

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(framing) = cli.framing {
        config.server.framing = framing;
    }

    let source = build_source(cli.source, &config)?;
    let mut gateway = Gateway::new(&config, source).context("Failed to initialize gateway")?;

    let addr = gateway.start().await.context("Failed to start gateway")?;
    info!("Gateway ready on {} ({} framing)", addr, config.server.framing);

    shutdown_signal().await;
    info!("Received shutdown signal");

    gateway.stop().await;
    let stats = gateway.stats();
    info!(
        "Gateway stopped: {} sightings broadcast, {} filtered, {} failed",
        stats.accepted, stats.rejected, stats.failed
    );

    Ok(())
}
