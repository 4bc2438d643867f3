//! # Request Router
//!
//! Picks a healthy instance via the load balancer, dispatches one MCP
//! call, and retries against a different instance on transport failure.
//! When a template has no healthy instance at all, falls back to an
//! ephemeral stdio process if the template has a stdio-capable instance
//! definition on record.
//!
//! A failed dispatch only ever drops the instance from *this request's*
//! candidate list — it never marks the instance unhealthy in the
//! registry. Only the health checker's periodic probe does that. A
//! single blip (a slow GC pause, one dropped TCP segment) shouldn't take
//! an instance out of rotation for every other in-flight request; the
//! next health sweep will catch it if the blip persists.

use crate::gateway_error::GatewayError;
use crate::registry::Registry;
use async_trait::async_trait;
use mcp_gateway_core::{
    DispatchError, HttpMcpClient, Instance, LoadBalancer, LoadBalancingStrategy, McpClient, McpRequest,
    StdioMcpClient, StdioPool, StdioPoolRegistry, Transport,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Whether a template can be served by spawning a one-off stdio process
/// when no registered instance is healthy. Modeled as a trait (rather
/// than reaching into `Registry` directly) so the fallback decision can
/// be tested against a fake without spinning up a real registry.
#[async_trait]
pub trait StdioCapability: Send + Sync {
    /// The first stdio-transport instance definition on record for
    /// `template`, regardless of its current health status, or `None` if
    /// the template has no stdio instance at all.
    async fn stdio_definition(&self, template: &str) -> Option<Instance>;
}

pub struct RegistryStdioCapability {
    registry: Arc<Registry>,
}

#[async_trait]
impl StdioCapability for RegistryStdioCapability {
    async fn stdio_definition(&self, template: &str) -> Option<Instance> {
        let template_record = self.registry.get_template(template).await?;
        template_record
            .instances
            .into_iter()
            .find(|instance| matches!(instance.transport, Transport::Stdio { .. }))
    }
}

pub struct RequestRouter {
    registry: Arc<Registry>,
    load_balancer: Arc<LoadBalancer>,
    stdio_capability: Arc<dyn StdioCapability>,
    stdio_pools: Arc<StdioPoolRegistry>,
}

impl RequestRouter {
    pub fn new(registry: Arc<Registry>, load_balancer: Arc<LoadBalancer>) -> Self {
        let stdio_capability = Arc::new(RegistryStdioCapability { registry: registry.clone() });
        Self { registry, load_balancer, stdio_capability, stdio_pools: Arc::new(StdioPoolRegistry::new()) }
    }

    /// Dispatch `method`/`params` against `template`, retrying up to the
    /// template's `max_retries` against different instances, and falling
    /// back to an ephemeral stdio process if no candidate is healthy.
    #[tracing::instrument(skip(self, params), fields(template = %template, method = %method))]
    pub async fn dispatch(&self, template: &str, method: &str, params: Option<Value>) -> Result<Value, GatewayError> {
        validate_method_params(method, params.as_ref())?;

        let template_record = self
            .registry
            .get_template(template)
            .await
            .ok_or_else(|| GatewayError::NotFound { message: format!("template '{template}' not found") })?;

        let mut candidates = template_record.get_healthy_instances().into_iter().cloned().collect::<Vec<_>>();
        if candidates.is_empty() {
            return self.dispatch_stdio_fallback(template, method, params).await;
        }

        let strategy = template_record.load_balancer.strategy;
        let max_attempts = template_record.load_balancer.max_retries.max(1) as usize;
        let pool_size = template_record.load_balancer.pool_size as usize;
        let timeout = Duration::from_secs(template_record.load_balancer.timeout as u64);

        let mut last_error = None;
        for _ in 0..max_attempts {
            let chosen = match self.load_balancer.select(template, &candidates, strategy) {
                Some(instance) => instance.clone(),
                None => return self.dispatch_stdio_fallback(template, method, params).await,
            };

            self.load_balancer.record_request_start(template, &chosen.id);
            let result = self.dispatch_once(template, &chosen.transport, method, params.clone(), timeout, pool_size).await;
            self.load_balancer.record_request_end(template, &chosen.id);

            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(instance = %chosen.id, error = %err, "dispatch attempt failed, trying next instance");
                    candidates.retain(|i| i.id != chosen.id);
                    let retriable = err.is_retriable();
                    last_error = Some(err);
                    if !retriable {
                        break;
                    }
                    if candidates.is_empty() {
                        break;
                    }
                }
            }
        }

        match last_error {
            Some(err) => Err(GatewayError::DispatchExhausted(err)),
            None => self.dispatch_stdio_fallback(template, method, params).await,
        }
    }

    /// Dispatch against an already-registered instance. HTTP goes through
    /// a fresh per-call client; stdio goes through the template's bounded
    /// process pool rather than spawning one-off.
    async fn dispatch_once(
        &self,
        template: &str,
        transport: &Transport,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        pool_size: usize,
    ) -> Result<Value, DispatchError> {
        let request_id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let request = McpRequest::new(request_id, method, params);

        match transport {
            Transport::Http { endpoint } => HttpMcpClient::new(endpoint.clone(), timeout).dispatch(request).await,
            Transport::Stdio { command, working_dir, env_vars } => {
                let pool: Arc<StdioPool> =
                    self.stdio_pools.get_or_create(template, command, working_dir, env_vars, pool_size);
                pool.dispatch(request, timeout).await
            }
        }
    }

    /// No healthy instance exists for `template`. If it has a stdio
    /// instance definition on record, spawn a disposable process for this
    /// one call and tag the response with `_gateway_info` so the caller
    /// can tell it came from the fallback path rather than a pooled
    /// instance. Otherwise the template simply has nothing to serve the
    /// request with.
    async fn dispatch_stdio_fallback(
        &self,
        template: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let definition = self.stdio_capability.stdio_definition(template).await;
        let Some(instance) = definition else {
            return Err(GatewayError::NoHealthyInstance { template: template.to_string() });
        };

        let Transport::Stdio { command, working_dir, env_vars } = &instance.transport else {
            return Err(GatewayError::NoHealthyInstance { template: template.to_string() });
        };

        let request_id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let request = McpRequest::new(request_id, method, params);
        let client = StdioMcpClient::new(command.clone(), working_dir.clone(), env_vars.clone(), Duration::from_secs(30));

        let result = client.dispatch(request).await.map_err(GatewayError::DispatchExhausted)?;
        Ok(attach_gateway_info(result, &instance.id))
    }

    pub fn load_balancer_strategy_supported(strategy: LoadBalancingStrategy) -> bool {
        matches!(
            strategy,
            LoadBalancingStrategy::RoundRobin
                | LoadBalancingStrategy::LeastConnections
                | LoadBalancingStrategy::Weighted
                | LoadBalancingStrategy::HealthBased
                | LoadBalancingStrategy::Random
        )
    }
}

/// Tag a successful stdio-fallback result with which backend served it.
/// Non-object results are wrapped rather than silently dropping the tag.
fn attach_gateway_info(result: Value, backend_id: &str) -> Value {
    match result {
        Value::Object(mut map) => {
            map.insert(
                "_gateway_info".to_string(),
                serde_json::json!({ "used_stdio_fallback": true, "backend": backend_id }),
            );
            Value::Object(map)
        }
        other => serde_json::json!({
            "result": other,
            "_gateway_info": { "used_stdio_fallback": true, "backend": backend_id },
        }),
    }
}

/// `tools/call` requires a `name` field and `resources/read` requires a
/// `uri` field; reject both before any dispatch attempt rather than
/// forwarding a request the backend can't act on.
fn validate_method_params(method: &str, params: Option<&Value>) -> Result<(), GatewayError> {
    let missing = |field: &str| GatewayError::InvalidRequest {
        message: format!("{method} requires a '{field}' parameter"),
    };

    match method {
        "tools/call" => {
            let has_name = params.and_then(|p| p.get("name")).and_then(|v| v.as_str()).is_some_and(|s| !s.is_empty());
            if !has_name {
                return Err(missing("name"));
            }
        }
        "resources/read" => {
            let has_uri = params.and_then(|p| p.get("uri")).and_then(|v| v.as_str()).is_some_and(|s| !s.is_empty());
            if !has_uri {
                return Err(missing("uri"));
            }
        }
        _ => {}
    }
    Ok(())
}
