use crate::helpers::{load_config::Config, shutdown::Shutdown};
use crate::instrumentation::tracing::{init_panic_handler, init_tracing};
use crate::metrics::http::start_metrics_server;
use crate::service::service::Service;

use anyhow::Result;
use std::path::PathBuf;
use std::time::Instant;
use tokio::signal;
use tracing::instrument;

/// Loads configuration, wires up logging/metrics, runs the broker until a
/// shutdown signal arrives, then drains every client and producer cleanly.
#[instrument(name = "runtime::run", target = "runtime::runtime", skip_all, level = "trace")]
pub async fn run(config_path: PathBuf) -> Result<()> {
    let cfg = Config::load(&config_path)?;

    let _tracing_guard = init_tracing(&cfg.general.log_dir);
    init_panic_handler();

    tracing::info!("starting logtail-hub broker");
    let startup_start = Instant::now();

    let shutdown = Shutdown::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(err) = signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
                return;
            }
            tracing::info!("ctrl-c received, broadcasting shutdown");
            shutdown.trigger();
        }
    });

    if cfg.metrics.enabled {
        let listen_addr = cfg.metrics.listen_addr.clone();
        tokio::spawn({
            let mut shutdown_rx = shutdown.subscribe();
            async move {
                tokio::select! {
                    () = start_metrics_server(&listen_addr) => {
                        tracing::debug!("metrics server exited");
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("metrics server shutting down");
                    }
                }
            }
        });
    } else {
        tracing::info!("metrics server disabled in [metrics] configuration");
    }

    let mut service = Service::new(&cfg)?;
    tracing::info!(
        startup_ms = startup_start.elapsed().as_secs_f64() * 1000.0,
        "broker ready"
    );

    let listen_addr = cfg.general.listen_addr.clone();
    let mut shutdown_rx = shutdown.subscribe();
    tokio::select! {
        res = service.serve(&listen_addr) => {
            if let Err(err) = res {
                tracing::error!(error = %err, "websocket listener exited with error");
            }
        }
        _ = shutdown_rx.recv() => {
            tracing::info!("shutdown signal received, draining hub");
        }
    }

    service.close().await?;
    tracing::info!("logtail-hub broker stopped");
    Ok(())
}
