//! Gateway service - HTTP router and listener.
//!
//! Routes:
//! - `GET {path}`: WebSocket upgrade into the bus
//! - `GET /health`: liveness probe
//! - `GET /metrics`: bus and transport counters as JSON

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use bus_server::{Handshake, Server};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::GatewayConfig;
use crate::handler::WebSocketHandler;
use crate::metrics::GatewayMetrics;
use crate::GatewayError;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub server: Server,
    pub config: Arc<GatewayConfig>,
    pub metrics: Arc<GatewayMetrics>,
}

/// WebSocket gateway in front of a bus [`Server`].
pub struct GatewayService {
    config: Arc<GatewayConfig>,
    server: Server,
    metrics: Arc<GatewayMetrics>,
}

impl GatewayService {
    /// Create a new gateway service
    pub fn new(config: GatewayConfig, server: Server) -> Result<Self, GatewayError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            server,
            metrics: Arc::new(GatewayMetrics::new()),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Get metrics
    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Build the router
    pub fn router(&self) -> Router {
        let state = AppState {
            server: self.server.clone(),
            config: Arc::clone(&self.config),
            metrics: Arc::clone(&self.metrics),
        };

        Router::new()
            .route(&self.config.path, get(handle_upgrade))
            .route("/health", get(health_check))
            .route("/metrics", get(metrics))
            .with_state(state)
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayError::Bind { addr, source })?;
        self.serve_with_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve_with_listener<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, path = %self.config.path, "Starting WebSocket gateway");

        let router = self.router();
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("WebSocket gateway stopped");
        Ok(())
    }
}

async fn handle_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let handshake = Handshake::new(Some(remote_addr), query);
    ws.max_message_size(state.config.max_message_size.saturating_mul(2))
        .on_upgrade(move |socket| async move {
            let handler = WebSocketHandler::new(state.server, state.config, state.metrics);
            handler.handle(socket, handshake).await;
        })
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "bus": state.server.metrics().snapshot(),
        "gateway": state.metrics.snapshot(),
    }))
}
