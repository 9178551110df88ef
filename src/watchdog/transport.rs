//! HTTP client framed over the watchdog's local socket.
//!
//! The watchdog opens its socket asynchronously after being launched, so
//! `connect` waits for the path to appear on a retry tick bounded by a total
//! timeout. Once connected, each request opens a fresh `UnixStream`, drives
//! a hyper HTTP/1.1 handshake over it, and exchanges the JSON bodies from
//! [`super::messages`].

use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::UnixStream;
use tokio::time::MissedTickBehavior;

use super::WatchdogError;
use super::messages::{
    REGISTER_PROCESS_PATH, RegisterProcessRequest, RegisterProcessResponse, SHUTDOWN_PATH,
    ShutdownRequest, ShutdownResponse,
};

/// How often `connect` re-probes for the socket file.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Total time `connect` waits for the socket to appear.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WatchdogTransport {
    retry_interval: Duration,
    connect_timeout: Duration,
    socket_path: Option<PathBuf>,
}

impl Default for WatchdogTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchdogTransport {
    pub fn new() -> Self {
        Self::with_timing(DEFAULT_RETRY_INTERVAL, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Timing override, used by tests and callers with their own deadline.
    pub fn with_timing(retry_interval: Duration, connect_timeout: Duration) -> Self {
        Self {
            retry_interval,
            connect_timeout,
            socket_path: None,
        }
    }

    /// Wait for the watchdog's socket to appear, then bind this client to it.
    ///
    /// "Not there yet" keeps waiting until the timeout; any other probe error
    /// (permissions, I/O) is not worth waiting out and fails immediately.
    pub async fn connect(&mut self, path: &Path) -> Result<(), WatchdogError> {
        let deadline = tokio::time::Instant::now() + self.connect_timeout;
        let mut tick = tokio::time::interval(self.retry_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; swallow it so probes are spaced
        // by the retry interval.
        tick.tick().await;

        loop {
            match std::fs::metadata(path) {
                Ok(_) => {
                    debug!("watchdog socket ready at {}", path.display());
                    self.socket_path = Some(path.to_path_buf());
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(WatchdogError::SocketWaitTimeout(self.connect_timeout));
                    }
                    tick.tick().await;
                }
                Err(e) => {
                    return Err(WatchdogError::SocketInaccessible {
                        path: path.to_path_buf(),
                        source: e,
                    });
                }
            }
        }
    }

    /// Register a worker pid with the watchdog.
    pub async fn send_register_pid(&self, pid: u32) -> Result<(), WatchdogError> {
        let _: RegisterProcessResponse = self
            .post(REGISTER_PROCESS_PATH, &RegisterProcessRequest { pid })
            .await?;
        Ok(())
    }

    /// Ask the watchdog to drain its registry and exit.
    pub async fn send_shutdown(&self) -> Result<(), WatchdogError> {
        let _: ShutdownResponse = self.post(SHUTDOWN_PATH, &ShutdownRequest {}).await?;
        Ok(())
    }

    /// One POST over a fresh connection. Every failure mode collapses into
    /// `WatchdogError::Transport`: the caller's recovery (log and continue)
    /// is the same in all of them.
    async fn post<Req, Resp>(&self, endpoint: &str, body: &Req) -> Result<Resp, WatchdogError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let path = self.socket_path.as_ref().ok_or(WatchdogError::NotConnected)?;

        let payload = serde_json::to_vec(body).map_err(transport_err)?;
        let stream = UnixStream::connect(path).await.map_err(transport_err)?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(transport_err)?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("watchdog control connection closed: {e}");
            }
        });

        let request = Request::builder()
            .method(Method::POST)
            .uri(endpoint)
            .header(HOST, "watchdog")
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(payload)))
            .map_err(transport_err)?;

        let response = sender.send_request(request).await.map_err(transport_err)?;
        if response.status() != StatusCode::OK {
            return Err(WatchdogError::Transport(format!(
                "unexpected status {} from {endpoint}",
                response.status()
            )));
        }
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(transport_err)?
            .to_bytes();
        serde_json::from_slice(&bytes).map_err(transport_err)
    }
}

fn transport_err<E: Display>(e: E) -> WatchdogError {
    WatchdogError::Transport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn connect_times_out_when_socket_never_appears() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("never.sock");

        let mut transport =
            WatchdogTransport::with_timing(Duration::from_millis(10), Duration::from_millis(100));
        let started = Instant::now();
        let err = transport.connect(&missing).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, WatchdogError::SocketWaitTimeout(_)));
        assert!(elapsed >= Duration::from_millis(100), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "overshot timeout: {elapsed:?}");
    }

    #[tokio::test]
    async fn connect_fails_fast_on_inaccessible_path() {
        let dir = tempfile::tempdir().unwrap();
        // A path whose parent is a regular file probes with ENOTDIR, not ENOENT
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let inaccessible = blocker.join("watchdog.sock");

        let mut transport =
            WatchdogTransport::with_timing(Duration::from_millis(10), Duration::from_secs(5));
        let started = Instant::now();
        let err = transport.connect(&inaccessible).await.unwrap_err();

        assert!(matches!(err, WatchdogError::SocketInaccessible { .. }));
        assert!(started.elapsed() < Duration::from_millis(200), "should not wait out the timeout");
    }

    #[tokio::test]
    async fn sending_before_connect_is_not_connected() {
        let transport = WatchdogTransport::new();
        let err = transport.send_register_pid(1).await.unwrap_err();
        assert!(matches!(err, WatchdogError::NotConnected));
        let err = transport.send_shutdown().await.unwrap_err();
        assert!(matches!(err, WatchdogError::NotConnected));
    }

    #[tokio::test]
    async fn non_200_response_is_a_transport_failure() {
        use axum::Router;
        use axum::http::StatusCode;
        use axum::routing::post;

        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("watchdog.sock");
        let listener = tokio::net::UnixListener::bind(&sock).unwrap();
        let app = Router::new().route(
            REGISTER_PROCESS_PATH,
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let mut transport =
            WatchdogTransport::with_timing(Duration::from_millis(10), Duration::from_secs(2));
        transport.connect(&sock).await.unwrap();
        let err = transport.send_register_pid(4242).await.unwrap_err();
        assert!(matches!(err, WatchdogError::Transport(_)));
    }

    #[tokio::test]
    async fn dead_socket_is_a_transport_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("watchdog.sock");
        // Bind and immediately drop the listener; the file stays behind but
        // nothing accepts on it.
        drop(tokio::net::UnixListener::bind(&sock).unwrap());

        let mut transport =
            WatchdogTransport::with_timing(Duration::from_millis(10), Duration::from_secs(2));
        transport.connect(&sock).await.unwrap();
        let err = transport.send_shutdown().await.unwrap_err();
        assert!(matches!(err, WatchdogError::Transport(_)));
    }
}
