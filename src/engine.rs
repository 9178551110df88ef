//! One engine worker process and its evaluation channel.
//!
//! The engine itself is an external numerical-computing application spoken
//! to over a loopback HTTP/JSON protocol; this module is deliberately a thin
//! adapter around "spawn it, register it with the watchdog, send it
//! expressions, terminate it".

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};

use crate::config::EngineConfig;
use crate::process;
use crate::watchdog::WatchdogClient;

const EVAL_TIMEOUT: Duration = Duration::from_secs(120);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct EvalRequest<'a> {
    expression: &'a str,
}

#[derive(Deserialize)]
struct EvalResponse {
    result: String,
}

pub struct EngineSession {
    child: Child,
    worker_pid: u32,
    endpoint: String,
    http: reqwest::Client,
}

impl EngineSession {
    /// Launch a worker and place it under watchdog supervision.
    pub async fn launch(cfg: &EngineConfig, watchdog: &WatchdogClient) -> Result<Self> {
        let binary = which::which(&cfg.command).unwrap_or_else(|_| {
            warn!("{} not found in PATH, using it as a relative path", cfg.command);
            PathBuf::from(&cfg.command)
        });
        debug!("engine binary: {}", binary.display());

        let mut cmd = Command::new(&binary);
        cmd.args(&cfg.args)
            .arg("--port")
            .arg(cfg.port.to_string())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn engine worker {}", binary.display()))?;
        let launcher_pid = child
            .id()
            .context("engine worker exited before its pid could be read")?;

        // Wrapper installations spawn the real compute process under a
        // different name; supervise that one, not the wrapper
        let worker_pid = match &cfg.worker_process_name {
            Some(name) => process::resolve_worker_pid(launcher_pid, name),
            None => launcher_pid,
        };
        info!("engine worker started (pid {worker_pid})");

        // Warn-and-continue: losing watchdog coverage for this worker must
        // not abort an otherwise successful launch
        if let Err(e) = watchdog.register_process(worker_pid).await {
            warn!("failed to register worker pid {worker_pid} with watchdog: {e}");
        }

        Ok(Self {
            child,
            worker_pid,
            endpoint: format!("http://127.0.0.1:{}/eval", cfg.port),
            http: reqwest::Client::new(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.worker_pid
    }

    /// Evaluate one expression in the worker.
    pub async fn evaluate(&self, expression: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(EVAL_TIMEOUT)
            .json(&EvalRequest { expression })
            .send()
            .await
            .context("engine evaluation request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("engine returned status {}", response.status());
        }
        let body: EvalResponse = response
            .json()
            .await
            .context("engine returned a malformed response")?;
        Ok(body.result)
    }

    /// Terminate the worker. The watchdog remains the backstop; this is the
    /// polite path taken during an orderly shutdown.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("engine worker {} already gone: {e}", self.worker_pid);
            return;
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => info!("engine worker {} exited: {status}", self.worker_pid),
            Ok(Err(e)) => warn!("waiting for engine worker {} failed: {e}", self.worker_pid),
            Err(_) => warn!(
                "engine worker {} did not exit within {SHUTDOWN_GRACE:?}",
                self.worker_pid
            ),
        }
    }
}
