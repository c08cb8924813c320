//! HTTP interface for the dashboard.
//!
//! Every store call runs on the blocking pool; handlers only parse input and
//! shape JSON.

pub mod cors;
mod handlers;
mod params;

use anyhow::Context;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::service::HistogramService;

pub use cors::CorsPolicy;
pub use params::QueryParams;

pub struct AppState {
    pub service: HistogramService,
    /// Threshold used when a request omits `min_conf`.
    pub default_min_conf: f64,
    pub cors: CorsPolicy,
}

impl AppState {
    pub fn new(service: HistogramService, server: &ServerConfig) -> Self {
        Self {
            service,
            default_min_conf: server.default_min_conf,
            cors: CorsPolicy::new(server.cors_origins.clone()),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::InvalidParameter { .. } | Error::MalformedRange { .. } | Error::MissingLabels => {
                StatusCode::BAD_REQUEST
            }
            Error::ImageNotFound(_) => StatusCode::NOT_FOUND,
            Error::ImageFetch(_) => StatusCode::BAD_GATEWAY,
            Error::RebuildFailed(_) | Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if self.is_client_error() {
            warn!("Rejected request: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Run `f` on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("Blocking task failed: {}", e);
        Error::Store(anyhow::anyhow!("blocking task failed: {e}"))
    })?
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/threshold-summary", get(handlers::threshold_summary))
        .route("/rebuild", post(handlers::rebuild))
        .route("/images", get(handlers::images))
        .route("/images/:id/detections", get(handlers::detections))
        .route("/images/:id/overlay.png", get(handlers::overlay))
        .route("/conf-hist", get(handlers::conf_hist))
        .route("/labels", get(handlers::labels))
        .layer(middleware::from_fn_with_state(state.clone(), cors::cors))
        .with_state(state)
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve_on<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;
    Ok(())
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    serve_on(listener, state, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
