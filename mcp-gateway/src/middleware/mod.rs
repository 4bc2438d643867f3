//! # HTTP Middleware
//!
//! CORS, request logging, and authentication for the gateway's Axum
//! router. Applied in order: CORS, then auth, then logging, so a rejected
//! request never reaches the logging layer's latency timer twice.

use crate::server::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

pub async fn logging_middleware(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let request_id = Uuid::new_v4().to_string();
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let response = next.run(req).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        latency_ms = start.elapsed().as_millis(),
        "request processed"
    );

    response
}

/// Routes that require an administrator (superuser) principal, matched by
/// path prefix since `/gateway/deregister/{template}/{id}` carries path
/// parameters.
const ADMIN_PATH_PREFIXES: &[&str] =
    &["/gateway/register", "/gateway/deregister", "/gateway/stats", "/gateway/registry"];

/// Checks the `Authorization`/`X-API-Key` headers against the auth gate
/// when `auth.enabled` is set, and enforces admin-only access on the
/// registration/stats/registry surface. OPTIONS requests (CORS preflight),
/// `/gateway/health`, and every request when auth is disabled pass through
/// untouched — `/gateway/health` is a liveness probe the gateway is
/// expected to expose without credentials, and a disabled auth gate means
/// the gateway is expected to sit behind a trusted network boundary.
pub async fn auth_middleware(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if req.method() == http::Method::OPTIONS || !state.config.auth.enabled || path == "/gateway/health" {
        return next.run(req).await;
    }

    let authorization = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let api_key = req.headers().get("X-API-Key").and_then(|h| h.to_str().ok()).map(|s| s.to_string());

    let principal = match state.auth_gate.authenticate(authorization.as_deref(), api_key.as_deref()) {
        Ok(principal) => principal,
        Err(err) => {
            use axum::response::IntoResponse;
            return err.into_response();
        }
    };

    if ADMIN_PATH_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
        if let Err(err) = principal.require_admin() {
            use axum::response::IntoResponse;
            return err.into_response();
        }
    }

    next.run(req).await
}

pub fn cors_middleware(allowed_origins: &[String]) -> CorsLayer {
    let mut cors = CorsLayer::new();
    if allowed_origins.iter().any(|o| o == "*") {
        cors = cors.allow_origin(Any);
    } else {
        for origin in allowed_origins {
            if let Ok(value) = origin.parse::<http::header::HeaderValue>() {
                cors = cors.allow_origin(value);
            }
        }
    }
    cors.allow_methods(Any).allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthGate;
    use crate::config::Config;
    use crate::health::HealthChecker;
    use crate::persistence::FileSnapshotPersistence;
    use crate::registry::Registry;
    use crate::router::RequestRouter;
    use crate::server::AppState;
    use axum::routing::get;
    use axum::Router;
    use axum_test::TestServer;
    use mcp_gateway_core::LoadBalancer;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use std::time::Instant;

    async fn state_with_auth_enabled() -> (AppState, String) {
        let dir = tempfile::tempdir().unwrap();
        let registry =
            Arc::new(Registry::load(Arc::new(FileSnapshotPersistence::new(dir.path().join("r.json")))).await);
        let load_balancer = Arc::new(LoadBalancer::new());
        let router = Arc::new(RequestRouter::new(registry.clone(), load_balancer.clone()));
        let health_checker = Arc::new(HealthChecker::new(registry.clone(), Default::default()));

        let auth_gate = Arc::new(AuthGate::new("test-secret-not-the-default", 30, 30));
        let (plain_key, _) = auth_gate.issue_api_key("non-admin-user", "ci key", vec!["tools:call".to_string()]);

        let mut config = Config::default();
        config.auth.enabled = true;

        let state = AppState {
            config: Arc::new(config),
            registry,
            router,
            auth_gate,
            load_balancer,
            health_checker,
            start_time: Instant::now(),
            request_count: Arc::new(AtomicU64::new(0)),
        };
        (state, plain_key)
    }

    fn test_app(state: AppState) -> Router {
        Router::new()
            .route("/gateway/registry", get(|| async { "ok" }))
            .route("/gateway/health", get(|| async { "ok" }))
            .route("/mcp/echo/tools/list", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state)
    }

    #[tokio::test]
    async fn non_admin_api_key_is_forbidden_on_admin_route() {
        let (state, plain_key) = state_with_auth_enabled().await;
        let server = TestServer::new(test_app(state)).unwrap();

        let response = server.get("/gateway/registry").add_header("X-API-Key", &plain_key).await;
        assert_eq!(response.status_code(), axum::http::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn non_admin_api_key_is_accepted_on_non_admin_route() {
        let (state, plain_key) = state_with_auth_enabled().await;
        let server = TestServer::new(test_app(state)).unwrap();

        let response = server.get("/mcp/echo/tools/list").add_header("X-API-Key", &plain_key).await;
        assert_eq!(response.status_code(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn gateway_health_is_reachable_without_credentials() {
        let (state, _plain_key) = state_with_auth_enabled().await;
        let server = TestServer::new(test_app(state)).unwrap();

        let response = server.get("/gateway/health").await;
        assert_eq!(response.status_code(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_route_without_any_credential_is_unauthenticated() {
        let (state, _plain_key) = state_with_auth_enabled().await;
        let server = TestServer::new(test_app(state)).unwrap();

        let response = server.get("/gateway/registry").await;
        assert_eq!(response.status_code(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
