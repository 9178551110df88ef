//! Thin HTTP tool surface for driving the engine.
//!
//! The catalog is intentionally small: a health probe and an evaluation
//! endpoint that forwards expressions to an engine worker, launching one
//! lazily on first use. Supervision of that worker belongs entirely to the
//! watchdog subsystem.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::engine::EngineSession;
use crate::watchdog::WatchdogClient;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<Mutex<Option<EngineSession>>>,
    engine_cfg: EngineConfig,
    watchdog: Arc<WatchdogClient>,
}

impl AppState {
    pub fn new(engine_cfg: EngineConfig, watchdog: Arc<WatchdogClient>) -> Self {
        Self {
            engine: Arc::new(Mutex::new(None)),
            engine_cfg,
            watchdog,
        }
    }

    /// Launch an engine worker if none is running yet.
    pub async fn ensure_worker(&self) -> Result<()> {
        let mut guard = self.engine.lock().await;
        if guard.is_none() {
            let session = EngineSession::launch(&self.engine_cfg, &self.watchdog).await?;
            info!("engine worker ready (pid {})", session.pid());
            *guard = Some(session);
        }
        Ok(())
    }

    /// Terminate the worker, if any. Called during orderly shutdown before
    /// the watchdog is stopped, so cleanup here is never undermined by a
    /// watchdog that already drained its registry.
    pub async fn shutdown_engine(&self) {
        if let Some(session) = self.engine.lock().await.take() {
            session.shutdown().await;
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/eval", post(eval))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct ToolEvalRequest {
    expression: String,
}

#[derive(Serialize)]
struct ToolEvalResponse {
    result: String,
}

async fn eval(
    State(state): State<AppState>,
    Json(req): Json<ToolEvalRequest>,
) -> Result<Json<ToolEvalResponse>, (StatusCode, String)> {
    if let Err(e) = state.ensure_worker().await {
        error!("failed to launch engine worker: {e:#}");
        return Err((StatusCode::BAD_GATEWAY, format!("engine unavailable: {e}")));
    }

    let guard = state.engine.lock().await;
    let Some(session) = guard.as_ref() else {
        return Err((StatusCode::BAD_GATEWAY, "engine unavailable".into()));
    };
    match session.evaluate(&req.expression).await {
        Ok(result) => Ok(Json(ToolEvalResponse { result })),
        Err(e) => {
            error!("evaluation failed: {e:#}");
            Err((StatusCode::BAD_GATEWAY, format!("evaluation failed: {e}")))
        }
    }
}
