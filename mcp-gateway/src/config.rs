//! # Configuration Management
//!
//! Loads and validates the gateway's runtime configuration: TOML file on
//! disk, then environment variable overrides, then schema validation.
//!
//! ## Environment Variables
//!
//! - `GATEWAY_HOST` / `GATEWAY_PORT`: override the HTTP bind address
//! - `GATEWAY_DATABASE_URL`: switch persistence to sqlite at this URL
//! - `GATEWAY_SNAPSHOT_PATH`: switch persistence to a JSON file at this path
//! - `GATEWAY_JWT_SECRET`: override the bearer-token signing secret
//! - `GATEWAY_AUTH_ENABLED`: force auth on/off regardless of the file
//! - `GATEWAY_LOG_LEVEL`: override the tracing filter directive
//!
//! ```rust,no_run
//! use mcp_gateway::config::Config;
//!
//! let mut config = Config::load("gateway.toml").unwrap();
//! config.apply_env_overrides().unwrap();
//! config.validate().unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::env;

/// Top-level configuration for the gateway process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub health_check: HealthCheckConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// HTTP server bind address, CORS policy, and request body cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors: CorsConfig,
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
}

/// How the registry persists templates and instances across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub persistence: PersistenceConfig,
}

/// Exactly one of these is wired up at startup; the other is unreachable
/// dead code once `create_server` picks a branch, matching the registry's
/// "exactly one persistence driver" invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistenceConfig {
    Sqlite { url: String },
    FileSnapshot { path: String },
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig::FileSnapshot { path: "gateway_registry.json".to_string() }
    }
}

/// How often and how aggressively the health checker probes instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub default_interval_secs: u32,
    pub probe_timeout_secs: u32,
    pub max_concurrent_probes: usize,
    pub unhealthy_after_failures: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: 30,
            probe_timeout_secs: 5,
            max_concurrent_probes: 16,
            unhealthy_after_failures: 3,
        }
    }
}

/// Bearer-token and API-key authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub jwt_secret: String,
    pub access_token_expire_minutes: i64,
    pub api_key_expire_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jwt_secret: "change-this-in-production".to_string(),
            access_token_expire_minutes: 30,
            api_key_expire_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                cors: CorsConfig { enabled: true, allowed_origins: vec!["*".to_string()] },
                max_body_size: 2 * 1024 * 1024,
            },
            registry: RegistryConfig { persistence: PersistenceConfig::default() },
            health_check: HealthCheckConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file, then apply environment overrides and
    /// validate. Returns the default configuration if `path` does not
    /// exist — matching the registry's own tolerance for a missing file
    /// on first run.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::warn!(path, "config file not found, starting from defaults");
            Config::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("GATEWAY_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }

        if let Ok(port_str) = env::var("GATEWAY_PORT") {
            self.server.port = port_str
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid GATEWAY_PORT: {}", port_str))?;
        }

        if let Ok(url) = env::var("GATEWAY_DATABASE_URL") {
            self.registry.persistence = PersistenceConfig::Sqlite { url };
        } else if let Ok(path) = env::var("GATEWAY_SNAPSHOT_PATH") {
            self.registry.persistence = PersistenceConfig::FileSnapshot { path };
        }

        if let Ok(secret) = env::var("GATEWAY_JWT_SECRET") {
            if !secret.is_empty() {
                self.auth.jwt_secret = secret;
            }
        }

        if let Ok(enabled) = env::var("GATEWAY_AUTH_ENABLED") {
            self.auth.enabled = enabled.parse().unwrap_or(false);
        }

        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            let valid = ["trace", "debug", "info", "warn", "error"];
            if valid.contains(&level.as_str()) {
                self.logging.level = level;
            } else {
                return Err(anyhow::anyhow!("invalid GATEWAY_LOG_LEVEL: {}", level));
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("server host cannot be empty"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server port must be between 1 and 65535"));
        }
        if self.server.cors.enabled && self.server.cors.allowed_origins.is_empty() {
            return Err(anyhow::anyhow!("cors enabled but no allowed origins specified"));
        }
        if self.server.max_body_size == 0 {
            return Err(anyhow::anyhow!("server max_body_size cannot be 0"));
        }

        if let PersistenceConfig::Sqlite { url } = &self.registry.persistence {
            if url.is_empty() {
                return Err(anyhow::anyhow!("sqlite persistence configured with empty url"));
            }
        }
        if let PersistenceConfig::FileSnapshot { path } = &self.registry.persistence {
            if path.is_empty() {
                return Err(anyhow::anyhow!("file snapshot persistence configured with empty path"));
            }
        }

        if self.health_check.default_interval_secs == 0 {
            return Err(anyhow::anyhow!("health check interval cannot be 0"));
        }
        if self.health_check.max_concurrent_probes == 0 {
            return Err(anyhow::anyhow!("max_concurrent_probes cannot be 0"));
        }

        if self.auth.enabled && self.auth.jwt_secret == "change-this-in-production" {
            return Err(anyhow::anyhow!(
                "auth is enabled but jwt_secret is still the default placeholder; set GATEWAY_JWT_SECRET"
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!("invalid log level: {}", self.logging.level));
        }

        Ok(())
    }
}
