//! REST API and WebSocket server of the hub
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check
//! - `GET /api/v1/devices` - Devices with their scan status
//! - `POST /api/v1/devices/:id/test` - Connection test (diagnostic only)
//! - `POST /api/v1/devices/:id/logs` - Collect SEL/MEL entries now
//! - `GET /api/v1/alerts` - Active alerts, optionally `?device_id=`
//! - `POST /api/v1/scan` - Trigger a fleet scan
//! - `GET /api/v1/scan` - Last fleet scan summary
//! - `WS /api/v1/stream` - Realtime alert and status events

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;
#[cfg(feature = "api")]
pub mod websocket;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;

use crate::config::ApiSection;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Enable CORS for dashboard
    pub enable_cors: bool,
}

impl ApiConfig {
    /// Config file values, with `HUB_ADDR`/`HUB_PORT` filling in a missing bind address.
    pub fn from_section(section: &ApiSection) -> Self {
        Self {
            bind_addr: section.bind.unwrap_or_else(crate::util::default_bind_addr),
            enable_cors: section.enable_cors,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: crate::util::default_bind_addr(),
            enable_cors: true,
        }
    }
}

/// Builds the router with every route and layer.
#[cfg(feature = "api")]
pub fn router(state: ApiState, enable_cors: bool) -> Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/devices", get(routes::devices::list_devices))
        .route(
            "/api/v1/devices/:id/test",
            post(routes::devices::test_connection),
        )
        .route(
            "/api/v1/devices/:id/logs",
            post(routes::devices::collect_logs),
        )
        .route("/api/v1/alerts", get(routes::alerts::list_alerts))
        .route(
            "/api/v1/scan",
            get(routes::scans::scan_status).post(routes::scans::trigger_scan),
        )
        .route("/api/v1/stream", get(websocket::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    use anyhow::Context;
    use tracing::info;

    info!("starting API server on {}", config.bind_addr);

    let app = router(state, config.enable_cors);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
