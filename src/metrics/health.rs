//! HTTP server for health checks, Prometheus metrics and the admin routes
//!
//! One axum router serves the monitoring endpoints. Once the application
//! state is attached, the admin routes from [`crate::api`] are merged in.

use crate::api::{self, ApiState};
use crate::metrics::collector::MetricsCollector;
use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::Result;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

const SERVICE_NAME: &str = "social-arena";

/// Shared state for the health handlers
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub app_state: Option<Arc<AppState>>,
}

/// HTTP server for monitoring and administration
pub struct HealthServer {
    state: HealthServerState,
    shutdown_tx: watch::Sender<bool>,
}

impl HealthServer {
    pub fn new(metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            state: HealthServerState {
                metrics_collector,
                app_state: None,
            },
            shutdown_tx,
        }
    }

    /// Attach the application state, enabling health checks and admin routes
    pub fn with_app_state(mut self, app_state: Arc<AppState>) -> Self {
        self.state.app_state = Some(app_state);
        self
    }

    /// Serve on an already bound listener until stopped
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let app = self.create_router();
        let addr = listener.local_addr()?;

        info!("HTTP server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stopped| *stopped).await;
                info!("HTTP server shutdown signal received");
            })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Build the router with the monitoring endpoints and, when available,
    /// the admin routes
    pub fn create_router(&self) -> Router {
        let monitoring = Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone());

        match &self.state.app_state {
            Some(app_state) => monitoring.merge(api::router(ApiState {
                engine: app_state.engine(),
                queue: app_state.queue(),
                dispatcher: app_state.dispatcher(),
                verifier: app_state.verifier(),
            })),
            None => monitoring,
        }
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping HTTP server...");

        // Kept in the channel, so a server that has not started serving yet still stops
        self.shutdown_tx.send_replace(true);
        Ok(())
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/health",
            "/ready",
            "/alive",
            "/metrics",
            "/stats",
            "/social-tournament/matches",
            "/game/social/join"
        ]
    }))
}

fn status_body(status: &str) -> Json<serde_json::Value> {
    Json(json!({
        "status": status,
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn health_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Health check requested");

    let Some(app_state) = &state.app_state else {
        return (StatusCode::SERVICE_UNAVAILABLE, status_body("unhealthy"));
    };

    match HealthCheck::liveness_check(app_state.clone()).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, status_body("healthy")),
        Ok(HealthStatus::Degraded) => (StatusCode::OK, status_body("degraded")),
        Ok(HealthStatus::Unhealthy) | Err(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, status_body("unhealthy"))
        }
    }
}

async fn ready_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Readiness check requested");

    let Some(app_state) = &state.app_state else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized");
    };

    match HealthCheck::readiness_check(app_state.clone()).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "Ready"),
        Ok(HealthStatus::Degraded) => (StatusCode::OK, "Degraded but ready"),
        Ok(HealthStatus::Unhealthy) => (StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
        Err(e) => {
            error!("Readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
        }
    }
}

async fn alive_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    let Some(app_state) = &state.app_state else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized");
    };

    match HealthCheck::liveness_check(app_state.clone()).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "Alive"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive"),
    }
}

async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    let metric_families = state.metrics_collector.registry().gather();
    let encoder = TextEncoder::new();

    match encoder.encode_to_string(&metric_families) {
        Ok(output) => {
            debug!("Serving {} metric families", metric_families.len());
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, encoder.format_type().to_string())],
                output,
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics",
            )
                .into_response()
        }
    }
}

async fn stats_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    let Some(app_state) = &state.app_state else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "service": { "name": SERVICE_NAME, "status": "error" },
                "error": "Service not initialized",
                "timestamp": chrono::Utc::now()
            })),
        );
    };

    match HealthCheck::check(app_state.clone()).await {
        Ok(health) => (
            StatusCode::OK,
            Json(json!({
                "service": {
                    "name": SERVICE_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                    "status": health.status,
                    "uptimeSeconds": health.stats.uptime_seconds
                },
                "connections": {
                    "active": health.stats.active_connections,
                    "users": health.stats.connected_users,
                    "rooms": health.stats.active_rooms
                },
                "queue": {
                    "waiting": health.stats.players_waiting
                },
                "matches": {
                    "created": health.stats.matches_created,
                    "completed": health.stats.matches_completed,
                    "cached": health.stats.cached_matches,
                    "answersAccepted": health.stats.answers_accepted
                },
                "components": health.checks,
                "timestamp": chrono::Utc::now()
            })),
        ),
        Err(e) => {
            error!("Failed to get stats: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "service": { "name": SERVICE_NAME, "status": "error" },
                    "error": "Failed to get service stats",
                    "timestamp": chrono::Utc::now()
                })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::store::InMemoryRespStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn detached_server() -> HealthServer {
        let collector = Arc::new(MetricsCollector::new().expect("Failed to create collector"));
        HealthServer::new(collector)
    }

    fn attached_server() -> (HealthServer, Arc<AppState>) {
        let app_state = Arc::new(
            AppState::with_transport(AppConfig::default(), Arc::new(InMemoryRespStore::new()))
                .unwrap(),
        );
        let server = HealthServer::new(app_state.metrics_collector())
            .with_app_state(app_state.clone());
        (server, app_state)
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_stop_before_serving_still_stops() {
        let server = detached_server();
        server.stop().await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), server.serve(listener))
            .await
            .expect("server ignored an earlier stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let (status, body) = get(detached_server().create_router(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("social-arena"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        collector.record_connection_opened();
        let server = HealthServer::new(collector);

        let (status, body) = get(server.create_router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("social_arena_connections_total"));
    }

    #[tokio::test]
    async fn test_endpoints_without_app_state() {
        for uri in ["/health", "/ready", "/alive", "/stats"] {
            let (status, _) = get(detached_server().create_router(), uri).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_admin_routes_need_app_state() {
        let (status, _) = get(
            detached_server().create_router(),
            "/social-tournament/matches/unknown",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (server, _app_state) = attached_server();
        let (status, body) = get(server.create_router(), "/social-tournament/matches/unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("statusCode"));
    }

    #[tokio::test]
    async fn test_stopped_service_is_not_ready() {
        let (server, _app_state) = attached_server();

        let (status, body) = get(server.create_router(), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "Not ready");

        let (status, body) = get(server.create_router(), "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"waiting\":0"));
    }
}
