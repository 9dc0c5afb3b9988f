//! Helmet Telemetry Daemon
//!
//! Ingests telemetry from a smart helmet over TCP or UDP and fans it out to
//! event bus subscribers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use helmetd::bus::{EventBus, topics};
use helmetd::config::ConfigStore;
use helmetd::net::IngestionManager;

/// Helmet Telemetry Daemon
#[derive(Parser, Debug)]
#[command(name = "helmetd")]
#[command(about = "Smart helmet telemetry ingestion daemon", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Helmet address, overriding the configured one
    #[arg(long)]
    host: Option<String>,

    /// Helmet port, overriding the configured one
    #[arg(long)]
    port: Option<u16>,

    /// Transport protocol (tcp or udp), overriding the configured one
    #[arg(long)]
    protocol: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("helmetd=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting helmetd v{}", env!("CARGO_PKG_VERSION"));

    let config = ConfigStore::load(&args.config);

    // Command-line overrides apply to this run only, never written back.
    if let Some(host) = &args.host {
        config.set_no_save("network.esp32_ip", host)?;
    }
    if let Some(port) = args.port {
        config.set_no_save("network.port", port)?;
    }
    if let Some(protocol) = &args.protocol {
        config.set_no_save("network.protocol", protocol)?;
    }

    let bus = Arc::new(EventBus::new());
    let dispatch = bus.start_dispatch();

    // Log sinks: the daemon's stand-in for dashboard consumers
    bus.subscribe("sensor.*", "sensor-log", |payload| {
        debug!("Sensor reading: {}", payload);
    });
    bus.subscribe(topics::CONNECTION_STATUS, "status-log", |payload| {
        info!("Connection status: {}", payload);
    });
    bus.subscribe(topics::CONNECTION_ERROR, "error-log", |payload| {
        warn!("Connection error: {}", payload);
    });

    let mut manager = IngestionManager::from_config(Arc::clone(&bus), &config)?;
    manager.start()?;

    shutdown_signal().await;

    if let Err(e) = manager.stop().await {
        warn!("Ingestion did not stop cleanly: {}", e);
    }

    bus.close();
    let _ = dispatch.await;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
