//! Top-level coordinator for server mode.
//!
//! Startup order matters: the watchdog comes up before anything that can
//! spawn a worker, and it goes down last so its registry still covers every
//! worker while the rest of the application shuts down.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};

use crate::config;
use crate::server::{self, AppState};
use crate::watchdog::WatchdogClient;

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = config::load_or_create(config_path)?;

    // Per-instance private directory: socket and watchdog log live here
    let instance_id = std::process::id().to_string();
    let workdir = config::resolve_workdir(&cfg)?.join(format!("instance-{instance_id}"));
    std::fs::create_dir_all(&workdir)
        .with_context(|| format!("failed to create instance directory {}", workdir.display()))?;

    // An unsupervised daemon is an unsafe state to run in: watchdog startup
    // failure aborts the whole startup
    let watchdog = Arc::new(WatchdogClient::new(&workdir, &instance_id, &cfg.log_level));
    watchdog
        .start()
        .await
        .context("failed to start the watchdog")?;

    let state = AppState::new(cfg.engine.clone(), Arc::clone(&watchdog));
    if cfg.prime_worker {
        if let Err(e) = state.ensure_worker().await {
            warn!("failed to prime engine worker: {e:#}");
        }
    }

    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("failed to bind tool server on {}", cfg.bind))?;
    info!("tool server listening on {} (pid {})", cfg.bind, std::process::id());

    let app = server::router(state.clone());
    let mut server_task = tokio::spawn(async move { axum::serve(listener, app).await });

    tokio::select! {
        _ = termination_signal() => {
            info!("termination signal received, shutting down");
        }
        res = &mut server_task => {
            match res {
                Ok(Ok(())) => info!("tool server exited"),
                Ok(Err(e)) => error!("tool server failed: {e}"),
                Err(e) => error!("tool server task panicked: {e}"),
            }
        }
    }

    // Ordered shutdown: application cleanup first, watchdog stop last
    server_task.abort();
    state.shutdown_engine().await;
    if let Err(e) = watchdog.stop().await {
        warn!("watchdog stop failed: {e}");
    }
    info!("numserved exiting");
    Ok(())
}

#[cfg(unix)]
async fn termination_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
