//! # HTTP Server Module
//!
//! Wires every gateway component — registry, load balancer, health
//! checker, request router, auth gate — into one [`AppState`] and builds
//! the Axum [`Router`] that exposes them over HTTP.
//!
//! ## Architecture
//!
//! 1. **Timeout Layer**: request timeout handling
//! 2. **CORS Middleware**: cross-origin resource sharing
//! 3. **Authentication Middleware**: bearer JWT / API key validation
//! 4. **Logging Middleware**: request/response logging
//!
//! ## API Endpoints
//!
//! ### MCP forwarding surface
//!
//! - `POST /mcp/{template}/tools/list`
//! - `POST /mcp/{template}/tools/call`
//! - `POST /mcp/{template}/resources/list`
//! - `POST /mcp/{template}/resources/read`
//! - `GET /mcp/{template}/health`
//!
//! ### Admin surface
//!
//! - `GET /health` - process liveness
//! - `GET /gateway/registry` - full template/instance listing
//! - `GET /gateway/health` - aggregate health percentage
//! - `GET /gateway/stats` - per-template statistics
//! - `POST /gateway/register` - register an instance
//! - `DELETE /gateway/deregister/{template}/{instance_id}` - remove an instance
//! - `POST /auth/token` - exchange username/password for a bearer token

use crate::auth::AuthGate;
use crate::config::{Config, PersistenceConfig};
use crate::handlers;
use crate::health::HealthChecker;
use crate::middleware::{auth_middleware, cors_middleware, logging_middleware};
use crate::persistence::{FileSnapshotPersistence, PersistLayer, SqlitePersistence};
use crate::registry::Registry;
use crate::router::RequestRouter;
use axum::routing::{delete, get, post};
use axum::Router;
use mcp_gateway_core::LoadBalancer;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

/// Shared state reachable from every handler. Cheap to clone — every
/// field is already an `Arc`, so axum cloning this per request never
/// touches the registry lock or the auth gate's key maps directly.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub router: Arc<RequestRouter>,
    pub auth_gate: Arc<AuthGate>,
    pub load_balancer: Arc<LoadBalancer>,
    pub health_checker: Arc<HealthChecker>,
    pub start_time: Instant,
    pub request_count: Arc<AtomicU64>,
}

/// Build the registry's persistence driver from configuration. Exactly
/// one of sqlite or file-snapshot is constructed — there is no dual-write
/// fallback between them.
async fn build_persistence(config: &PersistenceConfig) -> anyhow::Result<Arc<dyn PersistLayer>> {
    match config {
        PersistenceConfig::Sqlite { url } => Ok(Arc::new(SqlitePersistence::connect(url).await?)),
        PersistenceConfig::FileSnapshot { path } => Ok(Arc::new(FileSnapshotPersistence::new(path.clone()))),
    }
}

/// Create and configure the HTTP server with all middleware and routes.
///
/// This initializes the registry (loading any persisted snapshot), the
/// load balancer, the auth gate (running its startup sanity check), the
/// request router, and spawns the background health-check sweep. The
/// returned health-checker handle is detached — the process exits (and
/// takes the sweep loop down with it) on shutdown rather than joining it.
pub async fn create_server(config: Config) -> anyhow::Result<Router> {
    let persistence = build_persistence(&config.registry.persistence).await?;
    let registry = Arc::new(Registry::load(persistence).await);
    let load_balancer = Arc::new(LoadBalancer::new());

    let auth_gate = Arc::new(AuthGate::new(
        config.auth.jwt_secret.clone(),
        config.auth.access_token_expire_minutes,
        config.auth.api_key_expire_days,
    ));
    auth_gate.sanity_check(config.auth.enabled).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let router = Arc::new(RequestRouter::new(registry.clone(), load_balancer.clone()));

    let health_checker = Arc::new(HealthChecker::new(registry.clone(), config.health_check.clone()));
    health_checker.clone().spawn();

    if config.server.cors.enabled && config.server.cors.allowed_origins.iter().any(|o| o == "*") {
        tracing::warn!(
            "CORS is enabled with wildcard origins. This is unsafe for production. Configure explicit allowed_origins."
        );
    }

    let state = AppState {
        config: Arc::new(config.clone()),
        registry,
        router,
        auth_gate,
        load_balancer,
        health_checker,
        start_time: Instant::now(),
        request_count: Arc::new(AtomicU64::new(0)),
    };

    let app = Router::new()
        .route("/mcp/{template}/tools/list", get(handlers::tools_list))
        .route("/mcp/{template}/tools/call", post(handlers::tools_call))
        .route("/mcp/{template}/resources/list", get(handlers::resources_list))
        .route("/mcp/{template}/resources/read", post(handlers::resources_read))
        .route("/mcp/{template}/health", get(handlers::template_health))
        .route("/health", get(handlers::liveness))
        .route("/gateway/registry", get(handlers::gateway_registry))
        .route("/gateway/health", get(handlers::gateway_health))
        .route("/gateway/stats", get(handlers::gateway_stats))
        .route("/gateway/register", post(handlers::register))
        .route("/gateway/deregister/{template}/{instance_id}", delete(handlers::deregister))
        .route("/auth/token", post(handlers::login))
        .layer(axum::extract::DefaultBodyLimit::max(config.server.max_body_size))
        .layer(
            ServiceBuilder::new()
                .layer(cors_middleware(&config.server.cors.allowed_origins)) // 1. CORS (first)
                .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware)) // 2. Auth
                .layer(axum::middleware::from_fn_with_state(state.clone(), logging_middleware)) // 3. Logging
                .layer(TimeoutLayer::new(std::time::Duration::from_secs(
                    config.health_check.probe_timeout_secs.max(30) as u64,
                ))),
        )
        .with_state(state);

    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;

    #[tokio::test]
    async fn liveness_route_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.registry.persistence = PersistenceConfig::FileSnapshot {
            path: dir.path().join("registry.json").to_string_lossy().to_string(),
        };

        let app = create_server(config).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_template_dispatch_returns_404() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.registry.persistence = PersistenceConfig::FileSnapshot {
            path: dir.path().join("registry.json").to_string_lossy().to_string(),
        };

        let app = create_server(config).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server.get("/mcp/missing/tools/list").await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn registering_an_instance_then_reading_stats_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.registry.persistence = PersistenceConfig::FileSnapshot {
            path: dir.path().join("registry.json").to_string_lossy().to_string(),
        };

        let app = create_server(config).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server
            .post("/gateway/register")
            .json(&serde_json::json!({
                "template_name": "echo",
                "instance_id": "a",
                "transport": "http",
                "endpoint": "http://127.0.0.1:1",
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let stats = server.get("/gateway/stats").await;
        assert_eq!(stats.status_code(), StatusCode::OK);
        let body = stats.json::<serde_json::Value>();
        assert_eq!(body["registry"]["total_instances"], 1);
        assert!(body["load_balancer"]["available_strategies"].is_array());
        assert_eq!(body["health_checker"]["total_probes"], 0);
    }
}
