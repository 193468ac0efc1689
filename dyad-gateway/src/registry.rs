//! In-memory `ProviderRegistry` and `ApiKeyStore` implementations.
//!
//! `dyad_engine` defines both seams but implements neither — a binding crate supplies a
//! concrete store so the workspace is runnable end to end. A production deployment would swap
//! these for a Postgres- or etcd-backed equivalent behind the same traits; nothing in the
//! engine or in the handlers that follow cares which one is wired up.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dyad_engine::api_key::{ApiKey, ApiKeyId, ApiKeyStore};
use dyad_engine::provider::{HealthStatus, Provider, ProviderId, ProviderRegistry};

#[derive(Default)]
pub struct InMemoryProviderRegistry {
    providers: DashMap<ProviderId, Provider>,
}

impl InMemoryProviderRegistry {
    pub fn new(providers: Vec<Provider>) -> Self {
        let map = DashMap::new();
        for provider in providers {
            map.insert(provider.id.clone(), provider);
        }
        Self { providers: map }
    }

    pub fn upsert(&self, provider: Provider) {
        self.providers.insert(provider.id.clone(), provider);
    }

    pub fn remove(&self, id: &str) -> Option<Provider> {
        self.providers.remove(id).map(|(_, p)| p)
    }

    pub fn all(&self) -> Vec<Provider> {
        self.providers.iter().map(|e| e.clone()).collect()
    }
}

#[async_trait]
impl ProviderRegistry for InMemoryProviderRegistry {
    async fn get(&self, id: &ProviderId) -> Option<Provider> {
        self.providers.get(id).map(|e| e.clone())
    }

    async fn list_enabled(&self) -> Vec<Provider> {
        self.providers.iter().filter(|e| e.enabled).map(|e| e.clone()).collect()
    }

    async fn list_serving_model(&self, dyad_model_id: &str) -> Vec<Provider> {
        self.providers
            .iter()
            .filter(|e| e.enabled && e.model(dyad_model_id).is_some())
            .map(|e| e.clone())
            .collect()
    }

    async fn update_health(&self, id: &ProviderId, status: HealthStatus) {
        if let Some(mut entry) = self.providers.get_mut(id) {
            entry.health_status = status;
        }
    }
}

#[derive(Default)]
pub struct InMemoryApiKeyStore {
    keys: DashMap<ApiKeyId, ApiKey>,
}

impl InMemoryApiKeyStore {
    pub fn new(keys: Vec<ApiKey>) -> Self {
        let map = DashMap::new();
        for key in keys {
            map.insert(key.id.clone(), key);
        }
        Self { keys: map }
    }

    pub fn insert(&self, key: ApiKey) {
        self.keys.insert(key.id.clone(), key);
    }

    pub fn revoke(&self, id: &str) -> bool {
        if let Some(mut entry) = self.keys.get_mut(id) {
            entry.enabled = false;
            true
        } else {
            false
        }
    }

    pub fn all(&self) -> Vec<ApiKey> {
        self.keys.iter().map(|e| e.clone()).collect()
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
    async fn find_by_prefix(&self, prefix: &str) -> Vec<ApiKey> {
        self.keys.iter().filter(|e| e.prefix == prefix).map(|e| e.clone()).collect()
    }

    async fn get(&self, id: &ApiKeyId) -> Option<ApiKey> {
        self.keys.get(id).map(|e| e.clone())
    }

    async fn record_usage(&self, id: &ApiKeyId, requests: u64, tokens: u64) {
        if let Some(mut entry) = self.keys.get_mut(id) {
            entry.usage.requests_today += requests;
            entry.usage.tokens_today += tokens;
            entry.usage.requests_this_month += requests;
            entry.usage.tokens_this_month += tokens;
            entry.usage.last_used = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dyad_engine::api_key::{issue_key, Permission, RateLimits};
    use dyad_engine::provider::{AdapterConfig, ModelMapping};
    use std::collections::HashSet;
    use std::time::Duration;

    fn provider(id: &str, model: &str, enabled: bool) -> Provider {
        Provider {
            id: id.to_string(),
            slug: id.to_string(),
            name: id.to_string(),
            enabled,
            adapter: AdapterConfig::Proxy {
                proxy_url: "http://127.0.0.1:9".to_string(),
                header_rewrites: Default::default(),
                remove_headers: vec![],
                timeout: Duration::from_secs(1),
            },
            models: vec![ModelMapping {
                dyad_model_id: model.to_string(),
                adapter_model_id: model.to_string(),
                max_tokens: 4096,
                context_window: 8192,
                supports_streaming: true,
                supports_embeddings: false,
            }],
            credential_refs: vec![],
            rate_limit_hints: None,
            priority: 0,
            health_status: Default::default(),
        }
    }

    #[tokio::test]
    async fn list_serving_model_excludes_disabled_and_non_matching() {
        let registry = InMemoryProviderRegistry::new(vec![
            provider("p1", "gpt-4o", true),
            provider("p2", "gpt-4o", false),
            provider("p3", "claude", true),
        ]);
        let serving = registry.list_serving_model("gpt-4o").await;
        assert_eq!(serving.len(), 1);
        assert_eq!(serving[0].id, "p1");
    }

    #[tokio::test]
    async fn update_health_mutates_the_stored_record() {
        let registry = InMemoryProviderRegistry::new(vec![provider("p1", "m", true)]);
        registry
            .update_health(
                &"p1".to_string(),
                HealthStatus {
                    state: dyad_engine::provider::HealthState::Unhealthy,
                    last_checked: None,
                    reason: Some("boom".to_string()),
                },
            )
            .await;
        let stored = registry.get(&"p1".to_string()).await.unwrap();
        assert_eq!(stored.health_status.state, dyad_engine::provider::HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn find_by_prefix_and_record_usage_round_trip() {
        let issued = issue_key(
            "u1",
            HashSet::from([Permission::Chat]),
            RateLimits {
                requests_per_minute: 60,
                requests_per_day: 1000,
                tokens_per_minute: 10_000,
                tokens_per_day: 100_000,
            },
        );
        let prefix = issued.record.prefix.clone();
        let id = issued.record.id.clone();
        let store = InMemoryApiKeyStore::new(vec![issued.record]);

        let found = store.find_by_prefix(&prefix).await;
        assert_eq!(found.len(), 1);

        store.record_usage(&id, 2, 150).await;
        let updated = store.get(&id).await.unwrap();
        assert_eq!(updated.usage.requests_today, 2);
        assert_eq!(updated.usage.tokens_today, 150);
    }

    #[tokio::test]
    async fn revoke_disables_future_lookups_validity() {
        let issued = issue_key("u1", HashSet::new(), RateLimits {
            requests_per_minute: 1,
            requests_per_day: 1,
            tokens_per_minute: 1,
            tokens_per_day: 1,
        });
        let id = issued.record.id.clone();
        let store = InMemoryApiKeyStore::new(vec![issued.record]);
        assert!(store.revoke(&id));
        let key = store.get(&id).await.unwrap();
        assert!(!key.is_valid_now());
    }
}
