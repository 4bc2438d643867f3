//! # Load Balancer
//!
//! Selects a candidate instance for a request against one template.
//!
//! Selection never mutates the registry directly — callers pass in the
//! slice of candidates (already filtered to active instances by whoever
//! holds the registry lock) and get back a choice. In-flight connection
//! counts for `least_connections` and the round-robin cursor for
//! `round_robin` live here, keyed by template name, so they persist across
//! calls without the registry needing to know about them.

use crate::models::{Instance, LoadBalancingStrategy};
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Per-template counters the load balancer needs between calls: a
/// monotonic cursor for round robin, live in-flight counts per instance
/// id for least-connections, and cumulative request counts per instance
/// for stats reporting.
#[derive(Default)]
struct TemplateCounters {
    round_robin_cursor: AtomicUsize,
    in_flight: DashMap<String, i64>,
    total_requests: DashMap<String, u64>,
}

/// Stateful load balancer shared across all templates. Cheap to clone
/// (wrap in `Arc`) since the heavy state lives behind `DashMap`.
#[derive(Default)]
pub struct LoadBalancer {
    counters: DashMap<String, TemplateCounters>,
    total_requests: AtomicU64,
}

/// Snapshot of load-balancer activity for `/gateway/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct LoadBalancerStats {
    pub total_requests: u64,
    pub per_instance_requests: HashMap<String, u64>,
    pub per_instance_in_flight: HashMap<String, i64>,
    pub available_strategies: Vec<LoadBalancingStrategy>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose one instance from `candidates` according to `strategy`.
    /// `candidates` must already be filtered to instances the caller
    /// considers eligible (active, and healthy unless `strategy` is
    /// `health_based`, which does its own health-aware ranking).
    /// Returns `None` only when `candidates` is empty.
    pub fn select<'a>(
        &self,
        template: &str,
        candidates: &'a [Instance],
        strategy: LoadBalancingStrategy,
    ) -> Option<&'a Instance> {
        if candidates.is_empty() {
            return None;
        }
        match strategy {
            LoadBalancingStrategy::RoundRobin => self.select_round_robin(template, candidates),
            LoadBalancingStrategy::LeastConnections => self.select_least_connections(template, candidates),
            LoadBalancingStrategy::Weighted => self.select_weighted(template, candidates),
            LoadBalancingStrategy::HealthBased => self.select_health_based(template, candidates),
            LoadBalancingStrategy::Random => self.select_random(candidates),
        }
    }

    fn counters_for(&self, template: &str) -> dashmap::mapref::one::RefMut<'_, String, TemplateCounters> {
        self.counters
            .entry(template.to_string())
            .or_default()
    }

    fn select_round_robin<'a>(&self, template: &str, candidates: &'a [Instance]) -> Option<&'a Instance> {
        let counters = self.counters_for(template);
        let index = counters.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates.get(index)
    }

    fn select_least_connections<'a>(&self, template: &str, candidates: &'a [Instance]) -> Option<&'a Instance> {
        let counters = self.counters_for(template);
        candidates
            .iter()
            .min_by_key(|inst| counters.in_flight.get(&inst.id).map(|v| *v).unwrap_or(0))
    }

    /// Deterministic weighted round robin: each call advances a cursor
    /// over a virtual sequence formed by repeating each instance `weight`
    /// times, so distribution matches configured weights exactly over a
    /// full cycle rather than approximately over many random draws.
    fn select_weighted<'a>(&self, template: &str, candidates: &'a [Instance]) -> Option<&'a Instance> {
        let total_weight: u32 = candidates.iter().map(|i| i.weight()).sum();
        if total_weight == 0 {
            return self.select_round_robin(template, candidates);
        }
        let counters = self.counters_for(template);
        let position = counters.round_robin_cursor.fetch_add(1, Ordering::Relaxed) as u32 % total_weight;

        let mut cumulative = 0u32;
        for inst in candidates {
            cumulative += inst.weight();
            if position < cumulative {
                return Some(inst);
            }
        }
        candidates.last()
    }

    /// Ranks candidates by consecutive_failures ascending, then falls back
    /// to round robin among the tied minimum to still spread load.
    fn select_health_based<'a>(&self, template: &str, candidates: &'a [Instance]) -> Option<&'a Instance> {
        let min_failures = candidates.iter().map(|i| i.consecutive_failures).min()?;
        let healthiest: Vec<&Instance> = candidates
            .iter()
            .filter(|i| i.consecutive_failures == min_failures)
            .collect();
        if healthiest.len() == 1 {
            return healthiest.into_iter().next();
        }
        let counters = self.counters_for(template);
        let index = counters.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % healthiest.len();
        healthiest.get(index).copied()
    }

    fn select_random<'a>(&self, candidates: &'a [Instance]) -> Option<&'a Instance> {
        let index = rand::thread_rng().gen_range(0..candidates.len());
        candidates.get(index)
    }

    /// Mark the start of a dispatch against `instance_id`, for
    /// least-connections accounting. Pairs with `record_request_end`.
    pub fn record_request_start(&self, template: &str, instance_id: &str) {
        let counters = self.counters_for(template);
        *counters.in_flight.entry(instance_id.to_string()).or_insert(0) += 1;
        *counters.total_requests.entry(instance_id.to_string()).or_insert(0) += 1;
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark the end of a dispatch (success or failure) against
    /// `instance_id`. Safe to call even if `record_request_start` was
    /// never called for this id — the counter just stays at zero.
    pub fn record_request_end(&self, template: &str, instance_id: &str) {
        let counters = self.counters_for(template);
        if let Some(mut entry) = counters.in_flight.get_mut(instance_id) {
            *entry = (*entry - 1).max(0);
        }
    }

    /// Current in-flight count for an instance, for stats reporting.
    pub fn in_flight_count(&self, template: &str, instance_id: &str) -> i64 {
        self.counters
            .get(template)
            .and_then(|c| c.in_flight.get(instance_id).map(|v| *v))
            .unwrap_or(0)
    }

    /// Drop counters for a template once its last instance is deregistered,
    /// so the map doesn't grow unbounded across the registry's lifetime.
    pub fn forget_template(&self, template: &str) {
        self.counters.remove(template);
    }

    /// Aggregate stats across every template this load balancer has seen,
    /// for `/gateway/stats`.
    pub fn stats(&self) -> LoadBalancerStats {
        let mut per_instance_requests = HashMap::new();
        let mut per_instance_in_flight = HashMap::new();
        for entry in self.counters.iter() {
            for kv in entry.value().total_requests.iter() {
                per_instance_requests.insert(kv.key().clone(), *kv.value());
            }
            for kv in entry.value().in_flight.iter() {
                per_instance_in_flight.insert(kv.key().clone(), *kv.value());
            }
        }

        LoadBalancerStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            per_instance_requests,
            per_instance_in_flight,
            available_strategies: vec![
                LoadBalancingStrategy::RoundRobin,
                LoadBalancingStrategy::LeastConnections,
                LoadBalancingStrategy::Weighted,
                LoadBalancingStrategy::HealthBased,
                LoadBalancingStrategy::Random,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Instance, Transport};

    fn instance(id: &str) -> Instance {
        Instance::new(id, "t1", Transport::Http { endpoint: format!("http://{id}") })
    }

    #[test]
    fn round_robin_cycles_deterministically() {
        let lb = LoadBalancer::new();
        let candidates = vec![instance("a"), instance("b"), instance("c")];
        let picks: Vec<&str> = (0..6)
            .map(|_| lb.select("t1", &candidates, LoadBalancingStrategy::RoundRobin).unwrap().id.as_str())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn least_connections_picks_idlest() {
        let lb = LoadBalancer::new();
        let candidates = vec![instance("a"), instance("b")];
        lb.record_request_start("t1", "a");
        lb.record_request_start("t1", "a");
        lb.record_request_start("t1", "b");
        let chosen = lb.select("t1", &candidates, LoadBalancingStrategy::LeastConnections).unwrap();
        assert_eq!(chosen.id, "b");
    }

    #[test]
    fn least_connections_rebalances_after_end() {
        let lb = LoadBalancer::new();
        let candidates = vec![instance("a"), instance("b")];
        lb.record_request_start("t1", "a");
        lb.record_request_start("t1", "b");
        lb.record_request_start("t1", "b");
        lb.record_request_end("t1", "b");
        lb.record_request_end("t1", "b");
        let chosen = lb.select("t1", &candidates, LoadBalancingStrategy::LeastConnections).unwrap();
        assert_eq!(chosen.id, "b");
    }

    #[test]
    fn weighted_matches_ratio_over_full_cycle() {
        let lb = LoadBalancer::new();
        let mut heavy = instance("heavy");
        heavy.metadata.insert("weight".to_string(), serde_json::json!(3));
        let light = instance("light");
        let candidates = vec![heavy, light];

        let mut heavy_count = 0;
        for _ in 0..4 {
            let chosen = lb.select("t1", &candidates, LoadBalancingStrategy::Weighted).unwrap();
            if chosen.id == "heavy" {
                heavy_count += 1;
            }
        }
        assert_eq!(heavy_count, 3);
    }

    #[test]
    fn health_based_prefers_fewest_failures() {
        let lb = LoadBalancer::new();
        let mut flaky = instance("flaky");
        flaky.consecutive_failures = 4;
        let solid = instance("solid");
        let candidates = vec![flaky, solid];
        let chosen = lb.select("t1", &candidates, LoadBalancingStrategy::HealthBased).unwrap();
        assert_eq!(chosen.id, "solid");
    }

    #[test]
    fn stats_track_total_and_per_instance_requests() {
        let lb = LoadBalancer::new();
        let candidates = vec![instance("a"), instance("b")];
        lb.select("t1", &candidates, LoadBalancingStrategy::RoundRobin);
        lb.record_request_start("t1", "a");
        lb.record_request_start("t1", "a");
        lb.record_request_start("t1", "b");

        let stats = lb.stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.per_instance_requests["a"], 2);
        assert_eq!(stats.per_instance_requests["b"], 1);
        assert_eq!(stats.available_strategies.len(), 5);
    }

    #[test]
    fn forget_template_clears_counters() {
        let lb = LoadBalancer::new();
        lb.record_request_start("t1", "a");
        assert_eq!(lb.in_flight_count("t1", "a"), 1);
        lb.forget_template("t1");
        assert_eq!(lb.in_flight_count("t1", "a"), 0);
    }
}
