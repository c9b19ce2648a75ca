//! Hauptbahnhof hub daemon
//!
//! Loads the hub configuration, connects the state coordinator to the MQTT
//! broker and serves both WebSocket listeners until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use hbf_bridge::{BridgeEvent, MqttBridge};
use hbf_core::{config::DEFAULT_CONFIG_PATH, HubConfig, StateCoordinator};
use hbf_router::Gateway;
use hbf_transport::load_tls_acceptor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hauptbahnhof")]
#[command(about = "MQTT / WebSocket state hub")]
#[command(version)]
struct Cli {
    /// Config file path (.json or .toml)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = HubConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // Setup logging
    let filter = if cli.verbose || config.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if cli.check {
        tracing::info!("Configuration {} is valid", cli.config.display());
        return Ok(());
    }

    tracing::info!("Starting Hauptbahnhof");

    let (coordinator, outputs) = StateCoordinator::from_config(&config)?;
    let coordinator = Arc::new(coordinator);

    let tls = match (&config.websocket.chainfile, &config.websocket.private_key) {
        (Some(chain), Some(key)) => Some(
            load_tls_acceptor(chain, key).context("loading TLS certificate for external listener")?,
        ),
        _ => None,
    };

    let cancel = CancellationToken::new();

    let (bridge, mut bridge_events) = MqttBridge::new(config.mqtt.clone(), coordinator.clone());
    let bridge_task = tokio::spawn(bridge.run(outputs.mqtt_rx, cancel.clone()));

    tokio::spawn(async move {
        while let Some(event) = bridge_events.recv().await {
            match event {
                BridgeEvent::Connected => tracing::info!("Broker connection up"),
                BridgeEvent::Disconnected { reason } => {
                    tracing::warn!("Broker connection down: {:?}", reason)
                }
            }
        }
    });

    let gateway = Gateway::new(config.websocket.clone(), coordinator);

    let broadcaster = gateway.clone();
    let broadcast_cancel = cancel.clone();
    let broadcast_task = tokio::spawn(async move {
        broadcaster.run_broadcast(outputs.ws_rx, broadcast_cancel).await
    });

    let serve_cancel = cancel.clone();
    let serve_task = tokio::spawn(async move { gateway.serve(tls, serve_cancel).await });

    tracing::info!(
        "Hub ready: internal ws://{}, external {}",
        config.websocket.internal_addr(),
        config.websocket.external_addr()
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for ctrl-c")?;
            tracing::info!("Shutting down");
        }
        result = serve_task => {
            // Listeners only return on their own when binding failed
            result??;
        }
    }

    cancel.cancel();
    let _ = bridge_task.await;
    let _ = broadcast_task.await;

    Ok(())
}
