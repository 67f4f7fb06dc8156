//! stats-pusher entry point.
//!
//! 1. Load logging and pusher configuration from the environment
//! 2. Start the response tracker
//! 3. Run a heartbeat round every push interval until Ctrl+C or SIGTERM
//! 4. Stop the tracker, which also unbinds its socket

use std::sync::Arc;

use anyhow::{Context, Result};
use fabric_comm::Tracker;
use fabric_telemetry::{init_logging, TelemetryConfig};
use stats_pusher::{PusherConfig, StatsPusher};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&TelemetryConfig::for_service("stats-pusher")).context("failed to initialize logging")?;

    let config = PusherConfig::from_env().context("failed to load stats-pusher configuration")?;
    info!(
        coordinator = %config.comm.transport.coordinator,
        tracker = %config.comm.tracker.listen,
        heartbeat_url = %config.heartbeat_url,
        interval_ms = config.push_interval.as_millis() as u64,
        "Starting stats pusher"
    );

    let tracker = Arc::new(Tracker::new(config.tracker_config()));
    tracker.start().await.context("failed to start response tracker")?;

    let pusher = StatsPusher::new(config.clone(), tracker.clone());
    let mut ticker = tokio::time::interval(config.push_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Stats pusher is running. Press Ctrl+C to stop.");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = pusher.bundle_heartbeats().await {
                    error!(error = %e, "Heartbeat round failed");
                }
            }
            signal = &mut shutdown => {
                let signal = signal?;
                info!(signal, "Shutdown signal received");
                break;
            }
        }
    }

    tracker.stop().await;
    info!("Stats pusher stopped");
    Ok(())
}

/// Resolves with the name of the first shutdown signal: Ctrl+C, or SIGTERM
/// from a service manager.
#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
    tokio::select! {
        ctrl_c = tokio::signal::ctrl_c() => {
            ctrl_c.context("failed to listen for Ctrl+C")?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;
    Ok("Ctrl+C")
}
