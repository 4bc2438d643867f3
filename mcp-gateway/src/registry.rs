//! # Registry Store
//!
//! Holds every template and its instances in memory behind a single
//! `RwLock`, and persists the whole tree after every mutation through
//! whichever [`crate::persistence::PersistLayer`] the gateway was
//! configured with. Readers never block on persistence — `save` happens
//! after the in-memory lock is released.

use crate::persistence::PersistLayer;
use chrono::Utc;
use mcp_gateway_core::{validate_instance, Instance, LoadBalancerConfig, RegistryError, Template};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The full persisted shape of the registry: a map of template name to
/// template. Serialized as-is by file-snapshot persistence, and the
/// logical unit sqlite persistence reconstructs from its tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub templates: HashMap<String, Template>,
}

pub struct Registry {
    templates: RwLock<HashMap<String, Template>>,
    persistence: Arc<dyn PersistLayer>,
}

/// Aggregate counts returned by `/gateway/stats` and embedded in
/// `/gateway/registry`.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_templates: usize,
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub unhealthy_instances: usize,
    pub per_template: HashMap<String, TemplateStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateStats {
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub health_percentage: f64,
    pub load_balancer_strategy: mcp_gateway_core::LoadBalancingStrategy,
}

impl Registry {
    /// Loads the snapshot through `persistence` synchronously at startup.
    /// A missing or corrupt snapshot is tolerated — the registry just
    /// starts empty rather than failing to boot, matching the tolerance
    /// of the reference implementation's own registry load.
    pub async fn load(persistence: Arc<dyn PersistLayer>) -> Self {
        let templates = match persistence.load().await {
            Ok(Some(snapshot)) => snapshot.templates,
            Ok(None) => HashMap::new(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to load registry snapshot, starting empty");
                HashMap::new()
            }
        };

        Self { templates: RwLock::new(templates), persistence }
    }

    async fn persist(&self, templates: &HashMap<String, Template>) -> Result<(), RegistryError> {
        let snapshot = RegistrySnapshot { templates: templates.clone() };
        self.persistence.save(&snapshot).await.map_err(|e| RegistryError::Persistence(e.to_string()))
    }

    /// Register (create or update) an instance under `template_name`,
    /// creating the template with a default load-balancer config if it
    /// doesn't exist yet. Always persists before returning.
    pub async fn register_instance(
        &self,
        template_name: &str,
        mut instance: Instance,
    ) -> Result<(), RegistryError> {
        validate_instance(&instance)
            .map_err(|reason| RegistryError::InvalidInstance { reason })?;
        instance.template_name = template_name.to_string();

        let mut templates = self.templates.write().await;
        let template = templates
            .entry(template_name.to_string())
            .or_insert_with(|| Template::new(template_name.to_string()));
        template.upsert_instance(instance);

        self.persist(&templates).await
    }

    /// Remove one instance. If its template becomes empty, the template
    /// itself is removed too — an empty template carries no useful load
    /// balancer config once nothing backs it.
    pub async fn deregister_instance(&self, template_name: &str, instance_id: &str) -> Result<bool, RegistryError> {
        let mut templates = self.templates.write().await;
        let removed = match templates.get_mut(template_name) {
            Some(template) => {
                let removed = template.remove_instance(instance_id);
                if removed && template.instances.is_empty() {
                    templates.remove(template_name);
                }
                removed
            }
            None => false,
        };

        if removed {
            self.persist(&templates).await?;
        }
        Ok(removed)
    }

    pub async fn get_template(&self, name: &str) -> Option<Template> {
        self.templates.read().await.get(name).cloned()
    }

    pub async fn list_templates(&self) -> Vec<Template> {
        self.templates.read().await.values().cloned().collect()
    }

    pub async fn get_healthy_instances(&self, template_name: &str) -> Vec<Instance> {
        self.templates
            .read()
            .await
            .get(template_name)
            .map(|t| t.get_healthy_instances().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Apply a health-probe result to one instance. Unlike dispatch
    /// failures (handled entirely in the request router, which never
    /// touches this method), this is the only path that marks an
    /// instance unhealthy.
    pub async fn update_instance_health(&self, template_name: &str, instance_id: &str, is_healthy: bool) {
        let mut templates = self.templates.write().await;
        if let Some(template) = templates.get_mut(template_name) {
            if let Some(instance) = template.get_instance_mut(instance_id) {
                instance.update_health_status(is_healthy);
            }
        }
        if let Err(err) = self.persist(&templates).await {
            tracing::warn!(error = %err, "failed to persist health update");
        }
    }

    /// Remove every instance whose `consecutive_failures` has reached
    /// `max_failures`, dropping templates left empty. Returns the count
    /// removed.
    pub async fn clear_unhealthy_instances(&self, max_failures: u32) -> Result<usize, RegistryError> {
        let mut templates = self.templates.write().await;
        let mut removed = 0usize;
        let mut emptied = Vec::new();

        for (name, template) in templates.iter_mut() {
            let before = template.instances.len();
            template.instances.retain(|i| i.consecutive_failures < max_failures);
            removed += before - template.instances.len();
            if template.instances.is_empty() {
                emptied.push(name.clone());
            }
        }
        for name in emptied {
            templates.remove(&name);
        }

        if removed > 0 {
            self.persist(&templates).await?;
        }
        Ok(removed)
    }

    pub async fn update_load_balancer_config(
        &self,
        template_name: &str,
        config: LoadBalancerConfig,
    ) -> Result<(), RegistryError> {
        let mut templates = self.templates.write().await;
        let template = templates
            .get_mut(template_name)
            .ok_or_else(|| RegistryError::InvalidInstance { reason: format!("unknown template '{template_name}'") })?;
        template.load_balancer = config.clamp();
        template.updated_at = Utc::now();
        self.persist(&templates).await
    }

    pub async fn stats(&self) -> RegistryStats {
        let templates = self.templates.read().await;
        let mut per_template = HashMap::new();
        let mut total_instances = 0usize;
        let mut healthy_instances = 0usize;

        for (name, template) in templates.iter() {
            let total = template.instances.len();
            let healthy = template.get_healthy_instances().len();
            total_instances += total;
            healthy_instances += healthy;

            per_template.insert(
                name.clone(),
                TemplateStats {
                    total_instances: total,
                    healthy_instances: healthy,
                    health_percentage: if total == 0 { 0.0 } else { (healthy as f64 / total as f64) * 100.0 },
                    load_balancer_strategy: template.load_balancer.strategy,
                },
            );
        }

        RegistryStats {
            total_templates: templates.len(),
            total_instances,
            unhealthy_instances: total_instances - healthy_instances,
            healthy_instances,
            per_template,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::FileSnapshotPersistence;
    use mcp_gateway_core::Transport;
    use tempfile::tempdir;

    async fn registry() -> Registry {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::mem::forget(dir);
        Registry::load(Arc::new(FileSnapshotPersistence::new(path))).await
    }

    fn instance(id: &str) -> Instance {
        Instance::new(id, "echo", Transport::Http { endpoint: format!("http://{id}") })
    }

    #[tokio::test]
    async fn register_creates_template_if_missing() {
        let registry = registry().await;
        registry.register_instance("echo", instance("a")).await.unwrap();
        let template = registry.get_template("echo").await.unwrap();
        assert_eq!(template.instances.len(), 1);
    }

    #[tokio::test]
    async fn deregister_last_instance_removes_template() {
        let registry = registry().await;
        registry.register_instance("echo", instance("a")).await.unwrap();
        let removed = registry.deregister_instance("echo", "a").await.unwrap();
        assert!(removed);
        assert!(registry.get_template("echo").await.is_none());
    }

    #[tokio::test]
    async fn clear_unhealthy_removes_instances_past_threshold() {
        let registry = registry().await;
        let mut flaky = instance("flaky");
        flaky.consecutive_failures = 5;
        registry.register_instance("echo", flaky).await.unwrap();
        registry.register_instance("echo", instance("solid")).await.unwrap();

        let removed = registry.clear_unhealthy_instances(5).await.unwrap();
        assert_eq!(removed, 1);
        let template = registry.get_template("echo").await.unwrap();
        assert_eq!(template.instances.len(), 1);
        assert_eq!(template.instances[0].id, "solid");
    }

    #[tokio::test]
    async fn stats_reports_health_percentage() {
        let registry = registry().await;
        let mut healthy = instance("a");
        healthy.update_health_status(true);
        registry.register_instance("echo", healthy).await.unwrap();
        registry.register_instance("echo", instance("b")).await.unwrap();

        let stats = registry.stats().await;
        let template_stats = &stats.per_template["echo"];
        assert_eq!(template_stats.total_instances, 2);
        assert_eq!(template_stats.healthy_instances, 1);
        assert_eq!(template_stats.health_percentage, 50.0);
    }
}
