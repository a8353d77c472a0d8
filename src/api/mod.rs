//! HTTP API for ingestion and metering queries
//!
//! Routes:
//! - `POST /receive` and `POST /api/v1/write` - Prometheus Remote Write
//! - `GET /api/metering/v1/system_cpu_logical_count` - daily CPU usage
//! - `GET /health` - database reachability
//!
//! Served as plain HTTP, or behind client-certificate TLS when a
//! [`TlsConfig`] is present.

pub mod ingest;
pub mod query;
mod telemetry;
pub mod tls;

pub use tls::TlsConfig;

use crate::ingester::Ingester;
use crate::query::UsageQueryEngine;
use crate::store::MeteringStore;
use crate::{Error, Result};

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::warn;

/// Path of the metering query endpoint
pub const METERING_PATH: &str = "/api/metering/v1/system_cpu_logical_count";

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// HTTP API port
    pub http_port: u16,
    /// Maximum request body size
    pub max_body_size: usize,
    /// Enable CORS
    pub enable_cors: bool,
    /// Client-certificate TLS; plain HTTP when absent
    pub tls: Option<TlsConfig>,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            max_body_size: 16 * 1024 * 1024, // 16MB
            enable_cors: false,
            tls: None,
        }
    }
}

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub ingester: Arc<Ingester>,
    pub query_engine: Arc<UsageQueryEngine>,
    pub store: Arc<dyn MeteringStore>,
}

impl ApiState {
    /// State whose ingester and query engine share `store`.
    pub fn new(store: Arc<dyn MeteringStore>, ingester: Ingester) -> Self {
        Self {
            ingester: Arc::new(ingester),
            query_engine: Arc::new(UsageQueryEngine::new(store.clone())),
            store,
        }
    }

    /// Replace the query engine, e.g. to pin its clock.
    pub fn with_query_engine(mut self, query_engine: UsageQueryEngine) -> Self {
        self.query_engine = Arc::new(query_engine);
        self
    }
}

/// Build the HTTP API router
pub fn build_http_router(state: ApiState, config: &ApiServerConfig) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};
    use tower_http::cors::{Any, CorsLayer};

    let router = Router::new()
        // Health check
        .route("/health", get(health_check).fallback(method_not_allowed))

        // Prometheus Remote Write
        .route(
            "/receive",
            post(ingest::prometheus::handle_remote_write).fallback(method_not_allowed),
        )
        .route(
            "/api/v1/write",
            post(ingest::prometheus::handle_remote_write).fallback(method_not_allowed),
        )

        // Metering
        .route(
            METERING_PATH,
            get(query::metering::system_cpu_logical_count).fallback(method_not_allowed),
        )

        // State
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(middleware::from_fn(telemetry::http_observability_middleware));

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}

async fn method_not_allowed() -> Error {
    Error::MethodNotAllowed
}

/// Health check endpoint
async fn health_check(State(state): State<ApiState>) -> Response {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "database": "reachable"
            })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Health check failed: database unreachable");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "status": "error",
                    "database": "unreachable"
                })),
            )
                .into_response()
        }
    }
}

/// Bind `config.http_port` on all interfaces.
pub async fn bind(config: &ApiServerConfig) -> Result<tokio::net::TcpListener> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.http_port));
    Ok(tokio::net::TcpListener::bind(addr).await?)
}
