//! # Gateway Data Model
//!
//! Core value types shared across the registry, load balancer, and MCP
//! client layer: templates, instances, transports, and load-balancer
//! configuration.
//!
//! Instances model their transport as a tagged variant rather than a
//! nullable-fields record — a `Transport::Http` instance cannot be missing
//! an endpoint, and a `Transport::Stdio` instance cannot be missing a
//! command, by construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the gateway talks to a backend instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum Transport {
    Http {
        endpoint: String,
    },
    Stdio {
        command: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        env_vars: Option<HashMap<String, String>>,
    },
}

impl Transport {
    pub fn kind(&self) -> &'static str {
        match self {
            Transport::Http { .. } => "http",
            Transport::Stdio { .. } => "stdio",
        }
    }
}

/// Health status of an instance, as maintained by the health checker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

/// Informational tag describing how an instance was deployed. The gateway
/// never acts on this value; it only observes and reports it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    #[default]
    Docker,
    Kubernetes,
    Local,
    Mock,
}

/// One concrete backend process/endpoint that speaks MCP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub template_name: String,
    #[serde(flatten)]
    pub transport: Transport,
    #[serde(default)]
    pub status: ServerStatus,
    #[serde(default)]
    pub backend: BackendType,

    pub container_id: Option<String>,
    pub deployment_id: Option<String>,
    pub namespace: Option<String>,

    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Instance {
    pub fn new(id: impl Into<String>, template_name: impl Into<String>, transport: Transport) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            template_name: template_name.into(),
            transport,
            status: ServerStatus::Unknown,
            backend: BackendType::Docker,
            container_id: None,
            deployment_id: None,
            namespace: None,
            last_health_check: None,
            consecutive_failures: 0,
            is_active: true,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ServerStatus::Healthy
    }

    /// Roll the health state forward after a probe. Idempotent — calling it
    /// twice with the same `is_healthy` value produces the same end state as
    /// calling it once, aside from the timestamp.
    pub fn update_health_status(&mut self, is_healthy: bool) {
        if is_healthy {
            self.status = ServerStatus::Healthy;
            self.consecutive_failures = 0;
        } else {
            self.status = ServerStatus::Unhealthy;
            self.consecutive_failures += 1;
        }
        let now = Utc::now();
        self.last_health_check = Some(now);
        self.updated_at = now;
    }

    /// Integer weight consumed by the `weighted` load-balancing strategy.
    /// Defaults to 1 when absent or non-numeric.
    pub fn weight(&self) -> u32 {
        self.metadata
            .get("weight")
            .and_then(|v| v.as_u64())
            .map(|w| w as u32)
            .unwrap_or(1)
            .max(1)
    }
}

/// Load-balancing strategy names. Deserializing an unrecognized string at
/// the load balancer falls back to `RoundRobin` rather than failing — see
/// `LoadBalancer::select`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    LeastConnections,
    Weighted,
    HealthBased,
    Random,
}

/// Per-template load-balancer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    #[serde(default)]
    pub strategy: LoadBalancingStrategy,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u32,
}

fn default_health_check_interval() -> u32 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_pool_size() -> u32 {
    3
}
fn default_timeout() -> u32 {
    60
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::RoundRobin,
            health_check_interval: default_health_check_interval(),
            max_retries: default_max_retries(),
            pool_size: default_pool_size(),
            timeout: default_timeout(),
        }
    }
}

impl LoadBalancerConfig {
    /// Clamp fields into the ranges the configuration schema promises
    /// (§3 of the design: 5-300s interval, 1-10 retries, 1-20 pool, 5-300s
    /// timeout). Used when values are accepted from an admin registration
    /// body rather than validated config.
    pub fn clamp(mut self) -> Self {
        self.health_check_interval = self.health_check_interval.clamp(5, 300);
        self.max_retries = self.max_retries.clamp(1, 10);
        self.pool_size = self.pool_size.clamp(1, 20);
        self.timeout = self.timeout.clamp(5, 300);
        self
    }
}

/// A named group of interchangeable MCP server instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub instances: Vec<Instance>,
    pub load_balancer: LoadBalancerConfig,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            instances: Vec::new(),
            load_balancer: LoadBalancerConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn get_healthy_instances(&self) -> Vec<&Instance> {
        self.instances
            .iter()
            .filter(|i| i.is_healthy() && i.is_active)
            .collect()
    }

    pub fn get_instance(&self, id: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn get_instance_mut(&mut self, id: &str) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|i| i.id == id)
    }

    /// Upsert by id: replace an existing instance's mutable fields, or
    /// append if new. Matches the registry's upsert contract in §4.1.
    pub fn upsert_instance(&mut self, instance: Instance) {
        if let Some(slot) = self.instances.iter_mut().find(|i| i.id == instance.id) {
            *slot = instance;
        } else {
            self.instances.push(instance);
        }
        self.updated_at = Utc::now();
    }

    pub fn remove_instance(&mut self, id: &str) -> bool {
        let before = self.instances.len();
        self.instances.retain(|i| i.id != id);
        let removed = self.instances.len() < before;
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }
}

/// Validate invariants 1-2 from §3 before an instance is accepted by the
/// registry. Invariant 2 (endpoint/command non-empty per transport) is
/// mostly enforced by the `Transport` tagged variant; this only still has
/// to check that an `Http` endpoint or `Stdio` command isn't empty-string /
/// empty-vec, which the type system can't express.
pub fn validate_instance(instance: &Instance) -> Result<(), String> {
    match &instance.transport {
        Transport::Http { endpoint } if endpoint.trim().is_empty() => {
            Err("http instance must have a non-empty endpoint".to_string())
        }
        Transport::Stdio { command, .. } if command.is_empty() => {
            Err("stdio instance must have a non-empty command".to_string())
        }
        _ => Ok(()),
    }
}
