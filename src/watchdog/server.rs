//! The watchdog peer: control server, registry, parent monitor, drain.
//!
//! Runs inside the detached watchdog process. Listens on the control socket
//! for pid registrations and shutdown requests while independently watching
//! the daemon that launched it. Whichever comes first - an explicit shutdown
//! or the parent vanishing - every registered worker is killed and the
//! process exits. The parent monitor is what makes the guarantee hold even
//! when the daemon dies without saying goodbye.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use log::{debug, error, info, warn};
use tokio::net::UnixListener;
use tokio::sync::{Mutex, watch};

use super::messages::{
    REGISTER_PROCESS_PATH, RegisterProcessRequest, RegisterProcessResponse, SHUTDOWN_PATH,
    ShutdownRequest, ShutdownResponse,
};
use crate::process;

pub struct WatchdogOptions {
    /// Control socket to listen on.
    pub socket_path: PathBuf,
    /// The daemon that launched us; its death triggers the drain.
    pub parent_pid: u32,
    /// How often the parent's liveness is probed.
    pub parent_poll_interval: Duration,
}

impl WatchdogOptions {
    pub fn new(socket_path: PathBuf, parent_pid: u32) -> Self {
        Self {
            socket_path,
            parent_pid,
            parent_poll_interval: process::DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Clone)]
struct WatchdogState {
    registry: Arc<Mutex<HashSet<u32>>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Serve the control socket until shutdown or parent death, then drain.
pub async fn run(opts: WatchdogOptions) -> Result<()> {
    if let Some(parent) = opts.socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create socket directory {}", parent.display()))?;
    }
    // A stale socket from a crashed predecessor blocks the bind
    if opts.socket_path.exists() {
        let _ = std::fs::remove_file(&opts.socket_path);
    }
    let listener = UnixListener::bind(&opts.socket_path)
        .with_context(|| format!("failed to bind {}", opts.socket_path.display()))?;
    info!(
        "watchdog listening on {} (supervising parent pid {})",
        opts.socket_path.display(),
        opts.parent_pid
    );

    let registry = Arc::new(Mutex::new(HashSet::new()));
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let state = WatchdogState {
        registry: Arc::clone(&registry),
        shutdown_tx,
    };

    let app = Router::new()
        .route(REGISTER_PROCESS_PATH, post(register_process))
        .route(SHUTDOWN_PATH, post(shutdown))
        .with_state(state);

    let mut parent_gone = process::watch_termination(opts.parent_pid, opts.parent_poll_interval);
    let graceful = async move {
        tokio::select! {
            _ = &mut parent_gone => {
                info!("parent process exited without a shutdown request");
            }
            _ = shutdown_rx.changed() => {
                info!("shutdown requested over the control socket");
            }
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(graceful)
        .await
        .context("watchdog control server failed")?;

    drain(&registry).await;

    if let Err(e) = std::fs::remove_file(&opts.socket_path) {
        // An orphaned socket file is tolerated; the next instance unlinks it
        warn!("failed to remove socket file: {e}");
    }
    info!("watchdog exiting");
    Ok(())
}

async fn register_process(
    State(state): State<WatchdogState>,
    Json(req): Json<RegisterProcessRequest>,
) -> Json<RegisterProcessResponse> {
    let mut registry = state.registry.lock().await;
    if registry.insert(req.pid) {
        info!("supervising worker pid {}", req.pid);
    } else {
        debug!("worker pid {} already registered", req.pid);
    }
    Json(RegisterProcessResponse {})
}

async fn shutdown(
    State(state): State<WatchdogState>,
    Json(_req): Json<ShutdownRequest>,
) -> Json<ShutdownResponse> {
    // The ack goes out while the server begins its graceful stop
    let _ = state.shutdown_tx.send(true);
    Json(ShutdownResponse {})
}

/// Kill every registered worker, best effort.
///
/// A pid that is already gone is a no-op; a kill failure is logged and the
/// drain moves on - one stubborn worker must not shield the rest.
async fn drain(registry: &Mutex<HashSet<u32>>) {
    let pids: Vec<u32> = registry.lock().await.drain().collect();
    if pids.is_empty() {
        info!("no workers registered, nothing to drain");
        return;
    }
    info!("draining {} registered worker(s)", pids.len());
    for pid in pids {
        match process::kill_process(pid) {
            Ok(()) => info!("terminated worker pid {pid}"),
            Err(e) => error!("failed to terminate worker pid {pid}: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchdog::transport::WatchdogTransport;
    use tokio::process::{Child, Command};

    fn spawn_sleeper() -> Child {
        Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .expect("spawn sleep")
    }

    async fn connect(sock: &std::path::Path) -> WatchdogTransport {
        let mut transport =
            WatchdogTransport::with_timing(Duration::from_millis(10), Duration::from_secs(5));
        transport.connect(sock).await.expect("connect to watchdog");
        transport
    }

    #[tokio::test]
    async fn shutdown_drains_registered_workers_including_dead_ones() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("watchdog.sock");

        let mut opts = WatchdogOptions::new(sock.clone(), std::process::id());
        opts.parent_poll_interval = Duration::from_millis(50);
        let server = tokio::spawn(run(opts));

        let transport = connect(&sock).await;

        // A live worker and one that is already gone
        let mut live = spawn_sleeper();
        let live_pid = live.id().expect("live pid");
        let mut dead = spawn_sleeper();
        let dead_pid = dead.id().expect("dead pid");
        dead.kill().await.expect("kill dead worker");
        dead.wait().await.expect("reap dead worker");

        transport.send_register_pid(live_pid).await.unwrap();
        transport.send_register_pid(dead_pid).await.unwrap();
        transport.send_shutdown().await.unwrap();

        // The watchdog must exit cleanly even though one pid was stale
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("watchdog did not exit")
            .expect("watchdog task panicked")
            .expect("watchdog returned an error");

        // ...and the live worker must have received a kill
        tokio::time::timeout(Duration::from_secs(5), live.wait())
            .await
            .expect("live worker was not terminated")
            .expect("wait failed");
    }

    #[tokio::test]
    async fn parent_death_triggers_drain_without_a_shutdown_request() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("watchdog.sock");

        // Stand-in for the daemon process
        let mut parent = spawn_sleeper();
        let parent_pid = parent.id().expect("parent pid");

        let mut opts = WatchdogOptions::new(sock.clone(), parent_pid);
        opts.parent_poll_interval = Duration::from_millis(50);
        let server = tokio::spawn(run(opts));

        let transport = connect(&sock).await;
        let mut worker = spawn_sleeper();
        transport
            .send_register_pid(worker.id().expect("worker pid"))
            .await
            .unwrap();

        // Hard-kill the parent; no shutdown request is ever sent
        parent.kill().await.expect("kill parent");
        parent.wait().await.expect("reap parent");

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("watchdog did not notice parent death")
            .expect("watchdog task panicked")
            .expect("watchdog returned an error");

        tokio::time::timeout(Duration::from_secs(5), worker.wait())
            .await
            .expect("worker outlived the parent")
            .expect("wait failed");
    }

    #[tokio::test]
    async fn registering_the_same_pid_twice_keeps_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("watchdog.sock");

        let mut opts = WatchdogOptions::new(sock.clone(), std::process::id());
        opts.parent_poll_interval = Duration::from_millis(50);
        let server = tokio::spawn(run(opts));

        // Above the default pid limit, so the drain's kill is a no-op
        let transport = connect(&sock).await;
        transport.send_register_pid(4_194_304).await.unwrap();
        transport.send_register_pid(4_194_304).await.unwrap();
        transport.send_shutdown().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("watchdog did not exit")
            .expect("watchdog task panicked")
            .expect("watchdog returned an error");
    }
}
