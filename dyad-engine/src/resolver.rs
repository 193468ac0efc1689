//! Resolver (C8): turns a model id, an `ApiKey`, and a `FallbackPolicy` into an ordered,
//! de-duplicated candidate provider list.
//!
//! Generalizes `routing.rs`'s `Router`/`RoutingStrategy`/EWMA stats from "pick one provider
//! out of the whole configured set" to "order the providers a `FallbackPolicy` names for one
//! model, filtered by the key's allow-lists and each provider's `enabled` flag."

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::api_key::ApiKey;
use crate::metrics::MetricsSink;
use crate::provider::{HealthState, Provider};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    None,
    #[default]
    Priority,
    RoundRobin,
    Random,
    HealthBased,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackPolicy {
    pub strategy: FallbackStrategy,
    pub provider_ids: Vec<String>,
    pub max_attempts: u32,
    #[serde(with = "crate::common::duration_serde")]
    pub retry_delay: std::time::Duration,
    pub enabled: bool,
}

impl FallbackPolicy {
    /// The default when a model has no explicit policy: priority order over every provider
    /// serving the model, sorted by registered priority ascending.
    pub fn default_for(provider_ids: Vec<String>) -> Self {
        Self {
            strategy: FallbackStrategy::Priority,
            provider_ids,
            max_attempts: 3,
            retry_delay: std::time::Duration::ZERO,
            enabled: true,
        }
    }
}

const MAX_ATTEMPTS_CEILING: usize = 10;

pub struct Resolver {
    round_robin_cursors: DashMap<String, AtomicUsize>,
    metrics: std::sync::Arc<MetricsSink>,
}

impl Resolver {
    pub fn new(metrics: std::sync::Arc<MetricsSink>) -> Self {
        Self {
            round_robin_cursors: DashMap::new(),
            metrics,
        }
    }

    /// Produce the ordered candidate list for one dispatch.
    pub fn resolve(
        &self,
        dyad_model_id: &str,
        key: &ApiKey,
        policy: &FallbackPolicy,
        mut providers: Vec<Provider>,
    ) -> Vec<Provider> {
        providers.retain(|p| {
            p.enabled
                && policy.provider_ids.iter().any(|id| id == &p.id)
                && key.may_use_provider(&p.id)
                && key.may_use_model(dyad_model_id)
        });

        if !policy.enabled || policy.strategy == FallbackStrategy::None {
            providers.truncate(1);
            return providers;
        }

        match policy.strategy {
            FallbackStrategy::Priority => providers.sort_by_key(|p| p.priority),
            FallbackStrategy::RoundRobin => self.order_round_robin(dyad_model_id, &mut providers),
            FallbackStrategy::Random => providers.shuffle(&mut rand::thread_rng()),
            FallbackStrategy::HealthBased => self.order_health_based(&mut providers),
            FallbackStrategy::None => unreachable!(),
        }

        let cap = (policy.max_attempts as usize).clamp(1, MAX_ATTEMPTS_CEILING);
        providers.truncate(cap);
        providers
    }

    fn order_round_robin(&self, dyad_model_id: &str, providers: &mut [Provider]) {
        if providers.is_empty() {
            return;
        }
        let cursor = self
            .round_robin_cursors
            .entry(dyad_model_id.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        let offset = cursor.fetch_add(1, Ordering::SeqCst) % providers.len();
        providers.rotate_left(offset);
    }

    /// Orders by descending 1-minute EWMA success rate among providers reporting healthy;
    /// degrades to priority order when none are healthy, per spec §9's fixed window.
    fn order_health_based(&self, providers: &mut [Provider]) {
        let healthy_count = providers
            .iter()
            .filter(|p| p.health_status.state == HealthState::Healthy)
            .count();
        if healthy_count == 0 {
            providers.sort_by_key(|p| p.priority);
            return;
        }
        providers.sort_by(|a, b| {
            let a_healthy = a.health_status.state == HealthState::Healthy;
            let b_healthy = b.health_status.state == HealthState::Healthy;
            match (a_healthy, b_healthy) {
                (true, false) => std::cmp::Ordering::Less,
                (false, true) => std::cmp::Ordering::Greater,
                _ => {
                    let a_rate = self.metrics.success_rate_1m(&a.id);
                    let b_rate = self.metrics.success_rate_1m(&b.id);
                    b_rate.partial_cmp(&a_rate).unwrap_or(std::cmp::Ordering::Equal)
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AdapterConfig, HealthStatus};
    use std::collections::HashSet;

    fn provider(id: &str, priority: u32, health: HealthState) -> Provider {
        Provider {
            id: id.to_string(),
            slug: id.to_string(),
            name: id.to_string(),
            enabled: true,
            adapter: AdapterConfig::Proxy {
                proxy_url: "http://localhost".to_string(),
                header_rewrites: Default::default(),
                remove_headers: vec![],
                timeout: std::time::Duration::from_secs(10),
            },
            models: vec![],
            credential_refs: vec![],
            rate_limit_hints: None,
            priority,
            health_status: HealthStatus {
                state: health,
                last_checked: None,
                reason: None,
            },
        }
    }

    fn key() -> ApiKey {
        ApiKey {
            id: "k".to_string(),
            prefix: "abcdefgh".to_string(),
            hash: "h".to_string(),
            user_id: "u".to_string(),
            enabled: true,
            permissions: HashSet::new(),
            allowed_models: None,
            allowed_providers: None,
            rate_limits: crate::api_key::RateLimits {
                requests_per_minute: 10,
                requests_per_day: 10,
                tokens_per_minute: 10,
                tokens_per_day: 10,
            },
            usage: Default::default(),
            expires_at: None,
        }
    }

    #[test]
    fn priority_orders_ascending() {
        let metrics = std::sync::Arc::new(MetricsSink::new());
        let resolver = Resolver::new(metrics);
        let providers = vec![
            provider("p2", 2, HealthState::Unknown),
            provider("p1", 1, HealthState::Unknown),
        ];
        let policy = FallbackPolicy::default_for(vec!["p1".to_string(), "p2".to_string()]);
        let out = resolver.resolve("m", &key(), &policy, providers);
        assert_eq!(out[0].id, "p1");
        assert_eq!(out[1].id, "p2");
    }

    #[test]
    fn disabled_providers_are_excluded() {
        let metrics = std::sync::Arc::new(MetricsSink::new());
        let resolver = Resolver::new(metrics);
        let mut p2 = provider("p2", 2, HealthState::Unknown);
        p2.enabled = false;
        let providers = vec![provider("p1", 1, HealthState::Unknown), p2];
        let policy = FallbackPolicy::default_for(vec!["p1".to_string(), "p2".to_string()]);
        let out = resolver.resolve("m", &key(), &policy, providers);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "p1");
    }

    #[test]
    fn none_strategy_yields_single_candidate() {
        let metrics = std::sync::Arc::new(MetricsSink::new());
        let resolver = Resolver::new(metrics);
        let providers = vec![
            provider("p1", 1, HealthState::Unknown),
            provider("p2", 2, HealthState::Unknown),
        ];
        let policy = FallbackPolicy {
            strategy: FallbackStrategy::None,
            provider_ids: vec!["p1".to_string(), "p2".to_string()],
            max_attempts: 3,
            retry_delay: std::time::Duration::ZERO,
            enabled: true,
        };
        let out = resolver.resolve("m", &key(), &policy, providers);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn health_based_degrades_to_priority_when_none_healthy() {
        let metrics = std::sync::Arc::new(MetricsSink::new());
        let resolver = Resolver::new(metrics);
        let providers = vec![
            provider("p2", 2, HealthState::Unhealthy),
            provider("p1", 1, HealthState::Unhealthy),
        ];
        let policy = FallbackPolicy {
            strategy: FallbackStrategy::HealthBased,
            provider_ids: vec!["p1".to_string(), "p2".to_string()],
            max_attempts: 3,
            retry_delay: std::time::Duration::ZERO,
            enabled: true,
        };
        let out = resolver.resolve("m", &key(), &policy, providers);
        assert_eq!(out[0].id, "p1");
    }

    #[test]
    fn max_attempts_is_capped_at_ten() {
        let metrics = std::sync::Arc::new(MetricsSink::new());
        let resolver = Resolver::new(metrics);
        let ids: Vec<String> = (0..15).map(|i| format!("p{i}")).collect();
        let providers: Vec<Provider> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| provider(id, i as u32, HealthState::Unknown))
            .collect();
        let policy = FallbackPolicy {
            strategy: FallbackStrategy::Priority,
            provider_ids: ids,
            max_attempts: 50,
            retry_delay: std::time::Duration::ZERO,
            enabled: true,
        };
        let out = resolver.resolve("m", &key(), &policy, providers);
        assert_eq!(out.len(), 10);
    }
}
