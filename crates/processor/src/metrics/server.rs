//! HTTP server for the Prometheus metrics endpoint
//!
//! Exposes `/metrics`, `/health` and `/ready`. Readiness follows a shared
//! flag the runner flips once every partition worker has opened.

use super::registry::MetricsRegistry;
use super::MetricsError;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Configuration for the metrics server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsServerConfig {
    /// Bind address for the metrics server
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port for the metrics server
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9090
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl MetricsServerConfig {
    pub fn new(bind_address: impl Into<String>, port: u16) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> Result<SocketAddr, MetricsError> {
        self.address()
            .parse()
            .map_err(|e| MetricsError::BindError {
                address: self.address(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            })
    }
}

/// Health status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthStatus {
    pub fn healthy_with_uptime(uptime: Duration) -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }
}

/// Body of `/ready`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessStatus {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReadinessStatus {
    /// Ready once every partition worker is running
    pub fn from_flag(workers_running: bool) -> Self {
        if workers_running {
            Self {
                ready: true,
                reason: None,
            }
        } else {
            Self {
                ready: false,
                reason: Some("partition workers not running".to_string()),
            }
        }
    }
}

#[derive(Clone)]
struct ServerState {
    registry: MetricsRegistry,
    ready: Arc<AtomicBool>,
    start_time: Instant,
}

/// HTTP server for exposing Prometheus metrics
pub struct MetricsServer {
    config: MetricsServerConfig,
    registry: MetricsRegistry,
    ready: Arc<AtomicBool>,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig, registry: MetricsRegistry) -> Self {
        Self {
            config,
            registry,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag reported by `/ready`
    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    pub fn config(&self) -> &MetricsServerConfig {
        &self.config
    }

    fn router(&self) -> Router {
        let state = ServerState {
            registry: self.registry.clone(),
            ready: self.ready.clone(),
            start_time: Instant::now(),
        };

        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .with_state(state)
    }

    /// Serve until `shutdown` is cancelled
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), MetricsError> {
        let addr = self.config.socket_addr()?;
        let app = self.router();

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MetricsError::BindError {
                address: self.config.address(),
                source: e,
            })?;

        info!(
            "Metrics server listening on http://{}",
            listener.local_addr().map_err(|e| MetricsError::BindError {
                address: self.config.address(),
                source: e,
            })?
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| MetricsError::ServerStartError(e.to_string()))?;

        info!("Metrics server stopped");
        Ok(())
    }
}

async fn metrics_handler(State(state): State<ServerState>) -> Response {
    debug!("Metrics endpoint called");

    match state.registry.encode() {
        Ok(metrics) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            metrics,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

async fn health_handler(State(state): State<ServerState>) -> Json<HealthStatus> {
    Json(HealthStatus::healthy_with_uptime(state.start_time.elapsed()))
}

async fn ready_handler(State(state): State<ServerState>) -> Response {
    let status = ReadinessStatus::from_flag(state.ready.load(Ordering::Acquire));
    let code = if status.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status)).into_response()
}
