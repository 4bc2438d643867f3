//! # HTTP Handlers
//!
//! One function per route in the table the gateway exposes: the MCP
//! forwarding surface (`/mcp/{template}/...`) and the admin surface
//! (`/gateway/...`, `/auth/...`). Handlers stay thin — all the actual
//! logic lives in [`crate::router::RequestRouter`] and
//! [`crate::registry::Registry`].

use crate::gateway_error::GatewayError;
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::Json;
use mcp_gateway_core::{Instance, LoadBalancerConfig, Transport};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Body accepted by the `/mcp/{template}/...` endpoints that carry a
/// request payload. MCP's own `method` is implied by which route was hit;
/// only `params` is forwarded, matching the protocol's request shape
/// without making callers wrap it in a full JSON-RPC envelope themselves.
#[derive(Debug, Deserialize)]
pub struct McpCallBody {
    #[serde(default)]
    pub params: Option<Value>,
}

/// `tools/list` takes no request body — it's a GET.
pub async fn tools_list(
    State(state): State<AppState>,
    Path(template): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let result = state.router.dispatch(&template, "tools/list", None).await?;
    Ok(Json(result))
}

pub async fn tools_call(
    State(state): State<AppState>,
    Path(template): Path<String>,
    Json(body): Json<McpCallBody>,
) -> Result<Json<Value>, GatewayError> {
    let result = state.router.dispatch(&template, "tools/call", body.params).await?;
    Ok(Json(result))
}

/// `resources/list` takes no request body — it's a GET.
pub async fn resources_list(
    State(state): State<AppState>,
    Path(template): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let result = state.router.dispatch(&template, "resources/list", None).await?;
    Ok(Json(result))
}

pub async fn resources_read(
    State(state): State<AppState>,
    Path(template): Path<String>,
    Json(body): Json<McpCallBody>,
) -> Result<Json<Value>, GatewayError> {
    let result = state.router.dispatch(&template, "resources/read", body.params).await?;
    Ok(Json(result))
}

/// Per-template health summary, including `health_percentage` — a field
/// the distilled route description omits but the original gateway's
/// health endpoint always returned.
pub async fn template_health(
    State(state): State<AppState>,
    Path(template): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let record = state
        .registry
        .get_template(&template)
        .await
        .ok_or_else(|| GatewayError::NotFound { message: format!("template '{template}' not found") })?;

    let total = record.instances.len();
    let healthy = record.get_healthy_instances().len();
    let health_percentage = if total == 0 { 0.0 } else { (healthy as f64 / total as f64) * 100.0 };

    Ok(Json(json!({
        "template": template,
        "total_instances": total,
        "healthy_instances": healthy,
        "health_percentage": health_percentage,
    })))
}

/// Process-level liveness probe. Always `200 OK` while the process is up
/// — instance-level health lives under `/mcp/{template}/health` and
/// `/gateway/stats`.
pub async fn liveness() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
pub struct RegisterInstanceBody {
    pub template_name: String,
    pub instance_id: String,
    #[serde(flatten)]
    pub transport: Transport,
    #[serde(default)]
    pub load_balancer: Option<LoadBalancerConfig>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterInstanceBody>,
) -> Result<Json<Value>, GatewayError> {
    let instance = Instance::new(body.instance_id, body.template_name.clone(), body.transport);
    state.registry.register_instance(&body.template_name, instance).await?;

    if let Some(config) = body.load_balancer {
        state.registry.update_load_balancer_config(&body.template_name, config).await?;
    }

    Ok(Json(json!({"registered": true})))
}

pub async fn deregister(
    State(state): State<AppState>,
    Path((template, instance_id)): Path<(String, String)>,
) -> Result<Json<Value>, GatewayError> {
    let removed = state.registry.deregister_instance(&template, &instance_id).await?;
    if !removed {
        return Err(GatewayError::NotFound {
            message: format!("instance '{instance_id}' not found in template '{template}'"),
        });
    }
    Ok(Json(json!({"deregistered": true})))
}

pub async fn gateway_registry(State(state): State<AppState>) -> Json<Value> {
    let templates = state.registry.list_templates().await;
    let stats = state.registry.stats().await;
    Json(json!({"templates": templates, "stats": stats}))
}

pub async fn gateway_health(State(state): State<AppState>) -> Json<Value> {
    let stats = state.registry.stats().await;
    let health_percentage = if stats.total_instances == 0 {
        0.0
    } else {
        (stats.healthy_instances as f64 / stats.total_instances as f64) * 100.0
    };
    Json(json!({
        "total_templates": stats.total_templates,
        "total_instances": stats.total_instances,
        "healthy_instances": stats.healthy_instances,
        "unhealthy_instances": stats.unhealthy_instances,
        "health_percentage": health_percentage,
    }))
}

/// Mirrors the original gateway's `/gateway/stats` shape: one top-level
/// key per subsystem rather than a flat bag of counters.
pub async fn gateway_stats(State(state): State<AppState>) -> Json<Value> {
    let registry_stats = state.registry.stats().await;
    let load_balancer_stats = state.load_balancer.stats();
    let health_checker_stats = state.health_checker.stats();
    Json(json!({
        "gateway": {
            "uptime_seconds": state.start_time.elapsed().as_secs_f64(),
            "total_requests": state.request_count.load(std::sync::atomic::Ordering::Relaxed),
        },
        "registry": registry_stats,
        "load_balancer": load_balancer_stats,
        "health_checker": health_checker_stats,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<TokenResponse>, GatewayError> {
    let access_token = state.auth_gate.login(&body.username, &body.password)?;
    Ok(Json(TokenResponse { access_token, token_type: "bearer" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn liveness_always_reports_ok() {
        let Json(body) = liveness().await;
        assert_eq!(body["status"], "ok");
    }
}
