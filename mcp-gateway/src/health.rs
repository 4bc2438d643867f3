//! # Health Checker
//!
//! Periodically probes every registered instance and feeds the result
//! back into the registry. Probes run concurrently across instances but
//! bounded by a semaphore, so a health sweep over a large fleet can't open
//! an unbounded number of sockets at once.
//!
//! This deliberately is not a stateful circuit breaker — there's no
//! half-open retry budget or backoff curve here, just "probe, update
//! status, repeat." `consecutive_failures` on the instance itself is what
//! the load balancer's `health_based` strategy reads to prefer steadier
//! instances.

use crate::config::HealthCheckConfig;
use crate::registry::Registry;
use chrono::{DateTime, Utc};
use mcp_gateway_core::{HttpMcpClient, McpClient, McpRequest, StdioMcpClient, Transport};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub struct HealthChecker {
    registry: Arc<Registry>,
    config: HealthCheckConfig,
    semaphore: Arc<Semaphore>,
    total_probes: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    last_tick_unix: AtomicI64,
}

/// Snapshot of health-checker activity for `/gateway/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckerStats {
    pub total_probes: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate_percent: f64,
    pub last_tick: Option<DateTime<Utc>>,
}

impl HealthChecker {
    pub fn new(registry: Arc<Registry>, config: HealthCheckConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_probes));
        Self {
            registry,
            config,
            semaphore,
            total_probes: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            last_tick_unix: AtomicI64::new(0),
        }
    }

    /// Spawn the background sweep loop. The returned handle is aborted on
    /// graceful shutdown by whoever owns it (typically `main`).
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(self.config.default_interval_secs as u64));
            loop {
                ticker.tick().await;
                self.run_sweep().await;
            }
        })
    }

    async fn run_sweep(&self) {
        self.last_tick_unix.store(now_unix(), Ordering::Relaxed);

        let templates = self.registry.list_templates().await;
        let mut handles = Vec::new();

        for template in templates {
            for instance in template.instances {
                let registry = self.registry.clone();
                let semaphore = self.semaphore.clone();
                let timeout = Duration::from_secs(self.config.probe_timeout_secs as u64);
                let template_name = template.name.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire().await;
                    let healthy = probe_instance(&instance.transport, timeout).await;
                    registry.update_instance_health(&template_name, &instance.id, healthy).await;
                    healthy
                }));
            }
        }

        for handle in handles {
            match handle.await {
                Ok(healthy) => {
                    self.total_probes.fetch_add(1, Ordering::Relaxed);
                    if healthy {
                        self.success_count.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.failure_count.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(_) => {
                    // Probe task panicked; count it against the instance
                    // without crashing the sweep.
                    self.total_probes.fetch_add(1, Ordering::Relaxed);
                    self.failure_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Snapshot of probe counters for `/gateway/stats`.
    pub fn stats(&self) -> HealthCheckerStats {
        let total = self.total_probes.load(Ordering::Relaxed);
        let success = self.success_count.load(Ordering::Relaxed);
        let failure = self.failure_count.load(Ordering::Relaxed);
        let success_rate_percent = if total == 0 { 0.0 } else { (success as f64 / total as f64) * 100.0 };
        let last_tick_unix = self.last_tick_unix.load(Ordering::Relaxed);
        let last_tick = if last_tick_unix == 0 { None } else { DateTime::from_timestamp(last_tick_unix, 0) };

        HealthCheckerStats {
            total_probes: total,
            success_count: success,
            failure_count: failure,
            success_rate_percent,
            last_tick,
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Three-tier HTTP probe, first success wins: an MCP handshake (the
/// strictest and most informative check), then a plain HTTP GET against
/// the endpoint and its `/health` suffix (covers instances that don't
/// speak MCP over HTTP but still serve a basic liveness page), then a bare
/// TCP connect (covers instances behind something that refuses GET but is
/// still reachable).
async fn probe_instance(transport: &Transport, timeout: Duration) -> bool {
    match transport {
        Transport::Http { endpoint } => {
            probe_mcp_handshake(endpoint, timeout).await
                || probe_http_basic(endpoint, timeout).await
                || probe_tcp_connect(endpoint, timeout).await
        }
        Transport::Stdio { command, working_dir, env_vars } => {
            probe_stdio_handshake(command, working_dir, env_vars, timeout).await
        }
    }
}

async fn probe_mcp_handshake(endpoint: &str, timeout: Duration) -> bool {
    let client = HttpMcpClient::new(endpoint.to_string(), timeout);
    client.dispatch(McpRequest::new(0, "initialize", None)).await.is_ok()
}

async fn probe_http_basic(endpoint: &str, timeout: Duration) -> bool {
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(_) => return false,
    };

    if let Ok(response) = client.get(endpoint).send().await {
        if response.status().is_success() {
            return true;
        }
    }

    let health_url = format!("{}/health", endpoint.trim_end_matches('/'));
    match client.get(&health_url).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

async fn probe_tcp_connect(endpoint: &str, timeout: Duration) -> bool {
    let Ok(url) = reqwest::Url::parse(endpoint) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    let Some(port) = url.port_or_known_default() else {
        return false;
    };

    tokio::time::timeout(timeout, TcpStream::connect((host, port))).await.map(|r| r.is_ok()).unwrap_or(false)
}

/// Spawn the stdio instance's command, perform one MCP `initialize`
/// handshake over its stdin/stdout, and kill the process before returning.
/// Unlike the dispatch path this never reuses a process across sweeps —
/// a health probe should observe a cold start each time.
async fn probe_stdio_handshake(
    command: &[String],
    working_dir: &Option<String>,
    env_vars: &Option<std::collections::HashMap<String, String>>,
    timeout: Duration,
) -> bool {
    if command.is_empty() {
        return false;
    }
    let client = StdioMcpClient::new(command.to_vec(), working_dir.clone(), env_vars.clone(), timeout);
    client.dispatch(McpRequest::new(0, "initialize", None)).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::FileSnapshotPersistence;
    use mcp_gateway_core::Instance;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sweep_marks_healthy_instance_after_successful_probe() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 0, "result": {}
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            Registry::load(Arc::new(FileSnapshotPersistence::new(dir.path().join("r.json")))).await,
        );
        registry
            .register_instance("echo", Instance::new("a", "echo", Transport::Http { endpoint: server.uri() }))
            .await
            .unwrap();

        let checker = HealthChecker::new(registry.clone(), HealthCheckConfig::default());
        checker.run_sweep().await;

        let template = registry.get_template("echo").await.unwrap();
        assert!(template.instances[0].is_healthy());

        let stats = checker.stats();
        assert_eq!(stats.total_probes, 1);
        assert_eq!(stats.success_count, 1);
        assert!(stats.last_tick.is_some());
    }

    #[tokio::test]
    async fn sweep_falls_back_to_basic_http_probe_when_mcp_handshake_fails() {
        let server = MockServer::start().await;
        // Responds to any GET with 200, but never to POST (so the MCP
        // handshake tier fails and the basic-HTTP tier must catch it).
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            Registry::load(Arc::new(FileSnapshotPersistence::new(dir.path().join("r.json")))).await,
        );
        registry
            .register_instance("echo", Instance::new("a", "echo", Transport::Http { endpoint: server.uri() }))
            .await
            .unwrap();

        let checker = HealthChecker::new(registry.clone(), HealthCheckConfig::default());
        checker.run_sweep().await;

        let template = registry.get_template("echo").await.unwrap();
        assert!(template.instances[0].is_healthy());
    }

    #[tokio::test]
    async fn sweep_marks_unreachable_instance_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            Registry::load(Arc::new(FileSnapshotPersistence::new(dir.path().join("r.json")))).await,
        );
        registry
            .register_instance(
                "echo",
                Instance::new("a", "echo", Transport::Http { endpoint: "http://127.0.0.1:1".to_string() }),
            )
            .await
            .unwrap();

        let checker = HealthChecker::new(registry.clone(), HealthCheckConfig { probe_timeout_secs: 1, ..Default::default() });
        checker.run_sweep().await;

        let template = registry.get_template("echo").await.unwrap();
        assert!(!template.instances[0].is_healthy());

        let stats = checker.stats();
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.success_rate_percent, 0.0);
    }

    #[tokio::test]
    async fn sweep_marks_stdio_instance_unhealthy_when_command_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            Registry::load(Arc::new(FileSnapshotPersistence::new(dir.path().join("r.json")))).await,
        );
        registry
            .register_instance(
                "echo",
                Instance::new("a", "echo", Transport::Stdio { command: vec![], working_dir: None, env_vars: None }),
            )
            .await
            .unwrap();

        let checker = HealthChecker::new(registry.clone(), HealthCheckConfig::default());
        checker.run_sweep().await;

        let template = registry.get_template("echo").await.unwrap();
        assert!(!template.instances[0].is_healthy());
    }
}
