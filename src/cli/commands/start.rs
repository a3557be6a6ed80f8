//! Start command - launches the FluxMQ broker.

use crate::broker::Broker;
use crate::cli::Cli;
use crate::core::config::BrokerConfig;
use crate::ops::telemetry;
use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};

pub async fn run_start(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => BrokerConfig::load(path)?,
        None => BrokerConfig {
            worker: cli.worker,
            host: cli.host.clone(),
            port: cli.port.clone(),
            debug: cli.debug || cli.debug_alias,
        },
    };
    config.check();

    telemetry::init_tracing(config.debug)?;
    let broker = Broker::new(config)?;
    tracing::info!(broker_id = %broker.id(), "fluxmq starting");
    broker.start();

    let reason = shutdown_signal().await;
    tracing::info!("received {reason}, shutting down");
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() -> &'static str {
    let mut sigint = signal(SignalKind::interrupt()).expect("register SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("register SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}
