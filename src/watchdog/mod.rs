//! Watchdog supervision of engine worker processes.
//!
//! Engine workers must never outlive the daemon that spawned them, even when
//! the daemon is killed outright. The guarantee comes from a detached helper
//! process - this same binary in watchdog mode - that tracks every worker
//! pid the daemon registers and kills them all when the daemon stops or
//! disappears. The two halves talk HTTP/JSON over a private Unix socket in
//! the instance's working directory.
//!
//! [`WatchdogClient`] is the only type the rest of the daemon touches.

mod launcher;
pub mod messages;
pub mod server;
mod socket;
mod transport;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use log::warn;
use thiserror::Error;
use tokio::sync::watch;

pub use server::WatchdogOptions;

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("watchdog socket did not appear within {0:?}")]
    SocketWaitTimeout(Duration),

    #[error("watchdog socket at {path} is inaccessible: {source}")]
    SocketInaccessible {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("watchdog client is not connected")]
    NotConnected,

    #[error("watchdog transport failure: {0}")]
    Transport(String),

    #[error("failed to resolve the running executable's path: {0}")]
    FailedToGetExecutablePath(#[source] std::io::Error),

    #[error("failed to start the watchdog process: {0}")]
    FailedToStartWatchdogProcess(#[source] std::io::Error),
}

/// Client façade owning the watchdog launcher and transport.
///
/// `register_process` and `stop` gate on `start` having completed: they wait
/// on a write-once readiness signal that opens only after the watchdog
/// process is running and the transport is connected, so no request can race
/// ahead of a live connection. If `start` fails the gate stays closed and
/// pending calls keep waiting; startup failure is fatal to the daemon anyway.
pub struct WatchdogClient {
    workdir: PathBuf,
    instance_id: String,
    log_level: String,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    transport: OnceLock<transport::WatchdogTransport>,
}

impl WatchdogClient {
    pub fn new(workdir: &Path, instance_id: &str, log_level: &str) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            workdir: workdir.to_path_buf(),
            instance_id: instance_id.to_string(),
            log_level: log_level.to_string(),
            ready_tx,
            ready_rx,
            transport: OnceLock::new(),
        }
    }

    /// Launch the detached watchdog and connect to its control socket.
    ///
    /// Opens the readiness gate only once both steps succeeded. Errors here
    /// mean the daemon would run unsupervised and must abort startup.
    pub async fn start(&self) -> Result<(), WatchdogError> {
        if *self.ready_rx.borrow() {
            warn!("watchdog client already started");
            return Ok(());
        }

        let socket = socket::socket_path(&self.workdir, &self.instance_id);
        let spawned = launcher::launch(&socket, &self.workdir, &self.log_level)?;

        let mut transport = transport::WatchdogTransport::new();
        if let Err(e) = transport.connect(&socket).await {
            // Connecting failed after the process was spawned; kill it so no
            // ownerless watchdog lingers
            spawned.kill();
            return Err(e);
        }

        let _ = self.transport.set(transport);
        // Write-once: the gate never closes again and is never re-signaled
        let _ = self.ready_tx.send(true);
        Ok(())
    }

    /// Place a worker pid under watchdog supervision.
    ///
    /// Blocks until `start` has completed. A transport failure is returned
    /// for the caller to log; losing watchdog coverage for one worker must
    /// not abort an otherwise successful worker launch.
    pub async fn register_process(&self, pid: u32) -> Result<(), WatchdogError> {
        self.wait_ready().await?.send_register_pid(pid).await
    }

    /// Ask the watchdog to drain its registry and exit.
    ///
    /// Blocks until `start` has completed. Errors are returned for logging
    /// only; shutdown is already underway when this is called.
    pub async fn stop(&self) -> Result<(), WatchdogError> {
        self.wait_ready().await?.send_shutdown().await
    }

    async fn wait_ready(&self) -> Result<&transport::WatchdogTransport, WatchdogError> {
        let mut rx = self.ready_rx.clone();
        rx.wait_for(|ready| *ready)
            .await
            .map_err(|_| WatchdogError::NotConnected)?;
        self.transport.get().ok_or(WatchdogError::NotConnected)
    }

    /// Test seam: open the gate with a transport that never connected.
    #[cfg(test)]
    fn open_gate_for_tests(&self) {
        let _ = self.transport.set(transport::WatchdogTransport::new());
        let _ = self.ready_tx.send(true);
    }
}
