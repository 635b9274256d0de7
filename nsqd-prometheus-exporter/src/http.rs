//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::{ExporterError, Result};
use crate::poller::SharedPollStatus;
use crate::registry::SharedRegistry;

/// Content type of the Prometheus text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub const HEALTH_PATH: &str = "/health";
pub const READY_PATH: &str = "/ready";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: SharedRegistry,
    status: SharedPollStatus,
}

/// Create the HTTP router.
pub fn create_router(
    registry: SharedRegistry,
    status: SharedPollStatus,
    metrics_path: &str,
) -> Router {
    let state = AppState { registry, status };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route(HEALTH_PATH, get(health_handler))
        .route(READY_PATH, get(ready_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.registry.render();

    (StatusCode::OK, [("content-type", CONTENT_TYPE)], body).into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(state): State<AppState>) -> Response {
    if state.status.read().is_ready() {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no nsqd stats polled yet\n",
        )
            .into_response()
    }
}

/// Metrics server with an already-bound listener.
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
    local_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    /// Bind the listener.
    ///
    /// Binding happens up front so a taken port fails startup before any
    /// polling begins.
    pub async fn bind(
        registry: SharedRegistry,
        status: SharedPollStatus,
        listen_addr: SocketAddr,
        metrics_path: &str,
    ) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|source| ExporterError::Bind {
                addr: listen_addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ExporterError::Bind {
                addr: listen_addr,
                source,
            })?;

        Ok(Self {
            listener,
            router: create_router(registry, status, metrics_path),
            local_addr,
            metrics_path: metrics_path.to_string(),
        })
    }

    /// Address actually bound, useful when listening on port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            addr = %self.local_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(ExporterError::Serve)?;

        info!("HTTP server stopped");
        Ok(())
    }
}
