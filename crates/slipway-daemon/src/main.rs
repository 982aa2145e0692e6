//! # slipway-daemon
//!
//! Feeds decoded BLE detections through the configured presence engine.
//!
//! ## Running
//!
//! ```bash
//! # Development
//! scanner-bridge | cargo run --package slipway-daemon > events.jsonl
//!
//! # Production
//! SLIPWAY_ENV=production SLIPWAY_CONFIG=/etc/slipway/config.toml ./slipway-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `SLIPWAY_CONFIG`: Optional. Configuration file (default: platform path)
//! - `SLIPWAY_ENV`: Optional. `production` enables JSON file logging
//! - `SLIPWAY_LOG_LEVEL`: Optional. Log filter when `RUST_LOG` is unset (default: info)
//! - `SLIPWAY_LOG_DIR`: Optional. Production log directory (default: `/var/log/slipway` on Linux)
//! - `SLIPWAY__<SECTION>__<KEY>`: Optional. Overrides any configuration value

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use slipway_daemon::logging::LogMode;
use slipway_daemon::state::AppState;
use slipway_daemon::{defaults, env_vars, ingest, logging, output, tasks};
use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(LogMode::from_env())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting slipway-daemon");

    let config_path = std::env::var_os(env_vars::CONFIG).map(PathBuf::from);
    let state = AppState::load(config_path.as_deref()).map_err(|err| {
        error!(code = err.error_code(), error = %err, "Failed to load configuration");
        err
    })?;
    let engine = state.engine();

    let (events_tx, events_rx) = mpsc::channel(defaults::EVENT_CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let writer = tokio::spawn(output::write_events(events_rx, tokio::io::stdout()));

    let sweep_every = tasks::period(
        state.config().store.sweep_interval_secs,
        Duration::from_secs(defaults::SWEEP_INTERVAL_SECS),
    );
    let sweeper = tokio::spawn(tasks::run_sweeper(
        engine.clone(),
        sweep_every,
        shutdown_rx.clone(),
    ));

    let staleness = state.staleness_monitor().map(|monitor| {
        info!(stale_after_secs = monitor.stale_after_secs(), "Staleness monitor enabled");
        tokio::spawn(tasks::run_staleness(
            monitor,
            Duration::from_secs(defaults::STALENESS_TICK_SECS),
            events_tx.clone(),
            shutdown_rx.clone(),
        ))
    });

    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = ingest::run(stdin, engine.as_ref(), &events_tx) => {
            let stats = result.context("Failed to read detections")?;
            info!(
                lines = stats.lines,
                samples = stats.samples,
                events = stats.events,
                malformed = stats.malformed,
                "Input ended"
            );
        }
        () = shutdown_signal() => {}
    }

    if shutdown_tx.send(true).is_err() {
        warn!("Background tasks already stopped");
    }
    let evicted = sweeper.await.context("Sweeper task failed")?;
    if let Some(handle) = staleness {
        let expired = handle.await.context("Staleness task failed")?;
        info!(expired, "Staleness monitor finished");
    }

    drop(events_tx);
    let written = writer
        .await
        .context("Output task failed")?
        .context("Failed to write events")?;

    info!(evicted, written, tracked = engine.tracked_beacons().len(), "slipway-daemon shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM (Ctrl+C elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("Received SIGINT, initiating shutdown..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown..."),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C");
            }
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating shutdown..."),
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
