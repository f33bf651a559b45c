use anyhow::{Context, Result};
use overlay_core::{HostCommandRunner, HostFilesystem, PidFileSignaler, RouteReconciler};
use overlay_publisher::{PeerRouteHandler, RouterConfigPublisher, WatchLoop};
use overlay_topology::{stop_channel, BlockWatcher, FileBlockWatcher, StopHandle};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;

use config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env()?;
    init_tracing(&settings);

    info!(host = %settings.hostname, "Starting route-publisher...");

    let publisher = RouterConfigPublisher::new(
        settings.publisher.clone(),
        Arc::new(HostFilesystem::new()),
        Arc::new(PidFileSignaler::new()),
    )
    .await
    .context("Failed to initialize router config publisher")?;

    let mut watch = WatchLoop::new(settings.hostname.clone()).with_handler(Arc::new(publisher));
    if settings.install_routes {
        let routes = RouteReconciler::new(
            Arc::new(HostCommandRunner::new()),
            settings.endpoint_prefix,
            settings.gateway,
        );
        watch = watch.with_handler(Arc::new(PeerRouteHandler::new(Arc::new(routes))));
        info!("Kernel routes to peer blocks enabled");
    }

    let (stop_handle, stop) = stop_channel();
    let watcher = FileBlockWatcher::new(&settings.blocks_file)
        .with_poll_interval(settings.poll_interval)
        .with_resync_interval(settings.resync_interval);
    let snapshots = watcher
        .watch_blocks(stop.clone())
        .await
        .context("Failed to start watching for blocks")?;

    tokio::spawn(stop_on_shutdown(stop_handle));

    let stats = watch.run(snapshots, &stop).await?;
    info!(
        received = stats.received,
        applied = stats.applied,
        failed = stats.failed,
        "Shutdown complete"
    );

    Ok(())
}

fn init_tracing(settings: &Settings) {
    let default_level = if settings.publisher.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Request a stop on SIGINT or SIGTERM
async fn stop_on_shutdown(stop_handle: StopHandle) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received, stopping...");
                stop_handle.stop();
            } else {
                // Dropping the handle would stop the watcher, keep it alive instead.
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for ctrl-c: {}", e);
                terminate.recv().await;
            }
        }
        _ = terminate.recv() => {}
    }

    info!("Shutdown signal received, stopping...");
    stop_handle.stop();
}
