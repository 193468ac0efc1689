//! Engine (C9): the dependency-injection root tying every other component together and the
//! seven-step dispatch control flow spec.md's design section describes: authenticate,
//! authorize, admit, resolve, dispatch (with per-candidate fallback), emit, account.
//!
//! Generalizes the teacher's `AppState`/`GatewayService` composition root (`server.rs`) —
//! same idea of one struct owning every shared collaborator behind an `Arc` — but replaces its
//! `OnceLock` singletons with plain fields the caller constructs once at startup and clones
//! around.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::{self, AdapterResponse, AdapterRuntime, InvocationContext, NormalizedRequest, RequestKind};
use crate::api_key::{ApiKey, ApiKeyStore, Permission};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::credentials::CredentialService;
use crate::error::{AdapterError, EngineError};
use crate::metrics::{MetricsSink, Outcome};
use crate::models::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ModelInfo, ModelList};
use crate::provider::{Provider, ProviderId, ProviderRegistry};
use crate::rate_limiter::RateLimiter;
use crate::resolver::{FallbackPolicy, Resolver};
use crate::stream_pipe::{self, Frame};

/// What the caller asked for, independent of how it's eventually packaged for the wire.
pub enum DispatchOutcome<T> {
    Complete(T),
    Stream(std::pin::Pin<Box<dyn futures::Stream<Item = Result<Frame, AdapterError>> + Send>>),
}

pub struct Engine {
    registry: Arc<dyn ProviderRegistry>,
    api_keys: Arc<dyn ApiKeyStore>,
    credentials: Arc<CredentialService>,
    rate_limiter: Arc<RateLimiter>,
    resolver: Arc<Resolver>,
    metrics: Arc<MetricsSink>,
    breakers: DashMap<ProviderId, Arc<CircuitBreaker>>,
    adapters: DashMap<ProviderId, Arc<dyn AdapterRuntime>>,
    policies: DashMap<String, FallbackPolicy>,
    breaker_config: CircuitBreakerConfig,
    default_deadline: Duration,
}

impl Engine {
    pub fn new(
        registry: Arc<dyn ProviderRegistry>,
        api_keys: Arc<dyn ApiKeyStore>,
        credentials: Arc<CredentialService>,
        rate_limiter: Arc<RateLimiter>,
        metrics: Arc<MetricsSink>,
        breaker_config: CircuitBreakerConfig,
        default_deadline: Duration,
    ) -> Self {
        let resolver = Arc::new(Resolver::new(metrics.clone()));
        Self {
            registry,
            api_keys,
            credentials,
            rate_limiter,
            resolver,
            metrics,
            breakers: DashMap::new(),
            adapters: DashMap::new(),
            policies: DashMap::new(),
            breaker_config,
            default_deadline,
        }
    }

    /// Register (or replace) the fallback policy used for a given dyad model id. Models with
    /// no explicit policy fall back to priority order over every provider serving them.
    pub fn set_policy(&self, dyad_model_id: impl Into<String>, policy: FallbackPolicy) {
        self.policies.insert(dyad_model_id.into(), policy);
    }

    fn breaker_for(&self, provider_id: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider_id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider_id, self.breaker_config.clone())))
            .clone()
    }

    fn adapter_for(&self, provider: &Provider) -> Result<Arc<dyn AdapterRuntime>, EngineError> {
        if let Some(existing) = self.adapters.get(&provider.id) {
            return Ok(existing.clone());
        }
        let built = adapters::build_adapter(provider, self.credentials.clone())
            .map_err(EngineError::Provider)?;
        self.adapters.insert(provider.id.clone(), built.clone());
        Ok(built)
    }

    pub fn invalidate_adapter(&self, provider_id: &str) {
        self.adapters.remove(provider_id);
    }

    /// Returns the adapter already cached for a provider, without building one. `HealthMonitor`
    /// probes whatever dispatch has already instantiated rather than building a second adapter
    /// instance purely for health checks; a provider with no traffic yet simply has no cached
    /// adapter to probe until its first dispatch populates one.
    pub fn cached_adapter(&self, provider_id: &str) -> Option<Arc<dyn AdapterRuntime>> {
        self.adapters.get(provider_id).map(|a| a.clone())
    }

    // --- Step 1/2: authenticate + authorize -------------------------------------------------

    async fn authenticate(&self, bearer_token: &str) -> Result<ApiKey, EngineError> {
        let (prefix, secret) = crate::api_key::parse_bearer_token(bearer_token).ok_or_else(|| EngineError::Auth {
            message: "malformed bearer token".to_string(),
        })?;

        let candidates = self.api_keys.find_by_prefix(&prefix).await;
        let key = candidates
            .into_iter()
            .find(|k| crate::api_key::verify_secret(&secret, &k.hash))
            .ok_or_else(|| EngineError::Auth {
                message: "invalid api key".to_string(),
            })?;

        if !key.is_valid_now() {
            return Err(EngineError::Auth {
                message: "api key disabled or expired".to_string(),
            });
        }
        Ok(key)
    }

    fn authorize(&self, key: &ApiKey, permission: Permission) -> Result<(), EngineError> {
        if key.has_permission(permission) {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied {
                message: format!("key lacks {permission:?} permission"),
            })
        }
    }

    // --- Steps 3-7: admit, resolve, dispatch-with-fallback, emit, account -------------------

    async fn run(
        &self,
        key: &ApiKey,
        dyad_model_id: &str,
        estimated_tokens: u32,
        kind: RequestKind,
        payload: serde_json::Value,
        streaming: bool,
    ) -> Result<(AdapterResponse, ProviderId), EngineError> {
        self.rate_limiter.admit(key, estimated_tokens)?;

        let candidates = self.registry.list_serving_model(dyad_model_id).await;
        if candidates.is_empty() {
            return Err(EngineError::Client {
                message: format!("no provider serves model {dyad_model_id}"),
            });
        }

        let policy = self
            .policies
            .get(dyad_model_id)
            .map(|p| p.clone())
            .unwrap_or_else(|| FallbackPolicy::default_for(candidates.iter().map(|p| p.id.clone()).collect()));

        let ordered = self.resolver.resolve(dyad_model_id, key, &policy, candidates);
        if ordered.is_empty() {
            return Err(EngineError::Client {
                message: format!("key is not permitted to use any provider serving {dyad_model_id}"),
            });
        }

        let mut causes = Vec::new();
        for provider in &ordered {
            let breaker = self.breaker_for(&provider.id);
            if !breaker.admit().await {
                causes.push((provider.id.clone(), AdapterError::Configuration {
                    message: "circuit open".to_string(),
                }));
                continue;
            }

            let adapter = match self.adapter_for(provider) {
                Ok(a) => a,
                Err(EngineError::Provider(e)) => {
                    breaker.record(false).await;
                    causes.push((provider.id.clone(), e));
                    continue;
                }
                Err(other) => return Err(other),
            };

            let model = provider.model(dyad_model_id).ok_or_else(|| EngineError::Configuration {
                message: format!("provider {} has no mapping for {dyad_model_id}", provider.id),
            })?;

            let mut request_payload = payload.clone();
            if let Some(obj) = request_payload.as_object_mut() {
                obj.insert("model".to_string(), serde_json::json!(model.adapter_model_id));
            }

            let ctx = InvocationContext {
                deadline: Instant::now() + self.default_deadline,
                cancel: CancellationToken::new(),
            };
            let start = Instant::now();
            let result = adapter
                .invoke(
                    &ctx,
                    NormalizedRequest {
                        kind,
                        payload: request_payload,
                        streaming,
                    },
                )
                .await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(response) => {
                    breaker.record(true).await;
                    self.metrics.record(&provider.id, dyad_model_id, Outcome::Success, elapsed_ms, 0);
                    return Ok((response, provider.id.clone()));
                }
                Err(e) => {
                    if e.counts_as_failure() {
                        breaker.record(false).await;
                    }
                    self.metrics.record(&provider.id, dyad_model_id, Outcome::Failure, elapsed_ms, 0);
                    warn!(provider = %provider.id, error = %e, "adapter invocation failed, trying next candidate");
                    let fatal = matches!(e, AdapterError::Cancelled);
                    causes.push((provider.id.clone(), e));
                    if fatal {
                        break;
                    }
                    if policy.retry_delay > Duration::ZERO {
                        tokio::time::sleep(policy.retry_delay).await;
                    }
                }
            }
        }

        Err(EngineError::AllProvidersFailed { causes })
    }

    pub async fn dispatch_chat(
        &self,
        bearer_token: &str,
        dyad_model_id: String,
        request: ChatRequest,
    ) -> Result<DispatchOutcome<ChatResponse>, EngineError> {
        let key = self.authenticate(bearer_token).await?;
        self.authorize(&key, Permission::Chat)?;

        let estimated = request.estimated_tokens();
        let streaming = request.stream.unwrap_or(false);
        let payload = serde_json::to_value(&request).map_err(EngineError::internal)?;

        let (response, provider_id) = self
            .run(&key, &dyad_model_id, estimated, RequestKind::Chat, payload, streaming)
            .await?;

        let outcome = match response {
            AdapterResponse::Complete(value) => {
                let parsed: ChatResponse = serde_json::from_value(value).map_err(|e| {
                    EngineError::Provider(AdapterError::Protocol {
                        message: format!("malformed chat completion from {provider_id}: {e}"),
                    })
                })?;
                let actual_tokens = parsed.usage.as_ref().map(|u| u.total_tokens).unwrap_or(estimated);
                self.rate_limiter.reconcile_tokens(&key.id, estimated, actual_tokens);
                self.api_keys.record_usage(&key.id, 1, actual_tokens as u64).await;
                DispatchOutcome::Complete(parsed)
            }
            AdapterResponse::Stream(chunk_stream) => {
                self.rate_limiter.reconcile_tokens(&key.id, estimated, estimated);
                self.api_keys.record_usage(&key.id, 1, estimated as u64).await;
                DispatchOutcome::Stream(Box::pin(stream_pipe::frame_stream(chunk_stream)))
            }
        };
        Ok(outcome)
    }

    pub async fn dispatch_embeddings(
        &self,
        bearer_token: &str,
        dyad_model_id: String,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, EngineError> {
        let key = self.authenticate(bearer_token).await?;
        self.authorize(&key, Permission::Embeddings)?;

        let estimated = 256u32;
        let payload = serde_json::to_value(&request).map_err(EngineError::internal)?;
        let (response, provider_id) = self
            .run(&key, &dyad_model_id, estimated, RequestKind::Embeddings, payload, false)
            .await?;

        match response {
            AdapterResponse::Complete(value) => {
                let parsed: EmbeddingResponse = serde_json::from_value(value).map_err(|e| {
                    EngineError::Provider(AdapterError::Protocol {
                        message: format!("malformed embeddings response from {provider_id}: {e}"),
                    })
                })?;
                self.rate_limiter
                    .reconcile_tokens(&key.id, estimated, parsed.usage.total_tokens);
                self.api_keys
                    .record_usage(&key.id, 1, parsed.usage.total_tokens as u64)
                    .await;
                Ok(parsed)
            }
            AdapterResponse::Stream(_) => Err(EngineError::internal(anyhow::anyhow!(
                "embeddings adapter returned a stream, which is unsupported for this request kind"
            ))),
        }
    }

    pub async fn list_models(&self, bearer_token: &str) -> Result<ModelList, EngineError> {
        let key = self.authenticate(bearer_token).await?;
        self.authorize(&key, Permission::Models)?;

        let providers = self.registry.list_enabled().await;
        let mut data = Vec::new();
        for provider in providers {
            for model in &provider.models {
                if !key.may_use_model(&model.dyad_model_id) || !key.may_use_provider(&provider.id) {
                    continue;
                }
                data.push(ModelInfo {
                    id: model.dyad_model_id.clone(),
                    object: "model".to_string(),
                    owned_by: provider.id.clone(),
                    supports_streaming: model.supports_streaming,
                    supports_embeddings: model.supports_embeddings,
                    context_window: model.context_window,
                    max_tokens: model.max_tokens,
                });
            }
        }
        data.sort_by(|a, b| a.id.cmp(&b.id));
        data.dedup_by(|a, b| a.id == b.id);
        info!(count = data.len(), "listed models for key {}", key.id);
        Ok(ModelList {
            object: "list".to_string(),
            data,
        })
    }

    pub fn metrics(&self) -> &MetricsSink {
        &self.metrics
    }

    pub async fn circuit_status(&self, provider_id: &str) -> Option<crate::circuit_breaker::CircuitBreakerStatus> {
        let breaker = self.breakers.get(provider_id)?;
        Some(breaker.status().await)
    }

    pub async fn reset_circuit(&self, provider_id: &str) {
        if let Some(breaker) = self.breakers.get(provider_id) {
            breaker.reset().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_key::{issue_key, ApiKeyId, Permission, RateLimits};
    use crate::provider::{AdapterConfig, HealthStatus, ModelMapping};
    use crate::secrets::InMemorySecretsProvider;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct FakeRegistry {
        providers: Mutex<Vec<Provider>>,
    }

    #[async_trait]
    impl ProviderRegistry for FakeRegistry {
        async fn get(&self, id: &str) -> Option<Provider> {
            self.providers.lock().unwrap().iter().find(|p| p.id == id).cloned()
        }
        async fn list_enabled(&self) -> Vec<Provider> {
            self.providers.lock().unwrap().clone()
        }
        async fn list_serving_model(&self, model: &str) -> Vec<Provider> {
            self.providers
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.model(model).is_some())
                .cloned()
                .collect()
        }
        async fn update_health(&self, _id: &str, _status: HealthStatus) {}
    }

    struct FakeKeyStore {
        keys: Mutex<Vec<ApiKey>>,
    }

    #[async_trait]
    impl ApiKeyStore for FakeKeyStore {
        async fn find_by_prefix(&self, prefix: &str) -> Vec<ApiKey> {
            self.keys.lock().unwrap().iter().filter(|k| k.prefix == prefix).cloned().collect()
        }
        async fn get(&self, id: &ApiKeyId) -> Option<ApiKey> {
            self.keys.lock().unwrap().iter().find(|k| &k.id == id).cloned()
        }
        async fn record_usage(&self, _id: &ApiKeyId, _requests: u64, _tokens: u64) {}
    }

    fn provider_with_proxy(id: &str, model: &str) -> Provider {
        Provider {
            id: id.to_string(),
            slug: id.to_string(),
            name: id.to_string(),
            enabled: true,
            adapter: AdapterConfig::Proxy {
                proxy_url: "http://127.0.0.1:9".to_string(),
                header_rewrites: Default::default(),
                remove_headers: vec![],
                timeout: Duration::from_millis(200),
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

    fn engine(providers: Vec<Provider>, keys: Vec<ApiKey>) -> (Engine, String) {
        let registry: Arc<dyn ProviderRegistry> = Arc::new(FakeRegistry {
            providers: Mutex::new(providers),
        });
        let api_keys: Arc<dyn ApiKeyStore> = Arc::new(FakeKeyStore { keys: Mutex::new(keys) });
        let secrets = Arc::new(InMemorySecretsProvider::new(false).unwrap());
        let credentials = Arc::new(CredentialService::new(secrets, 16, Duration::from_secs(60), false));
        let rate_limiter = Arc::new(RateLimiter::new());
        let metrics = Arc::new(MetricsSink::new());
        let engine = Engine::new(
            registry,
            api_keys,
            credentials,
            rate_limiter,
            metrics,
            CircuitBreakerConfig::default(),
            Duration::from_millis(500),
        );
        (engine, String::new())
    }

    fn issued() -> (ApiKey, String) {
        let issued = issue_key(
            "u1",
            HashSet::from([Permission::Chat, Permission::Embeddings, Permission::Models]),
            RateLimits {
                requests_per_minute: 100,
                requests_per_day: 10_000,
                tokens_per_minute: 100_000,
                tokens_per_day: 1_000_000,
            },
        );
        (issued.record, issued.plaintext)
    }

    #[tokio::test]
    async fn unknown_model_yields_client_error() {
        let (key, token) = issued();
        let (engine, _) = engine(vec![provider_with_proxy("p1", "known-model")], vec![key]);
        let result = engine
            .dispatch_chat(&token, "unknown-model".to_string(), ChatRequest::default())
            .await;
        assert!(matches!(result, Err(EngineError::Client { .. })));
    }

    #[tokio::test]
    async fn bad_bearer_token_is_rejected() {
        let (engine, _) = engine(vec![provider_with_proxy("p1", "m")], vec![]);
        let result = engine
            .dispatch_chat("not-a-real-token", "m".to_string(), ChatRequest::default())
            .await;
        assert!(matches!(result, Err(EngineError::Auth { .. })));
    }

    #[tokio::test]
    async fn every_provider_failing_surfaces_all_providers_failed() {
        let (key, token) = issued();
        let (engine, _) = engine(vec![provider_with_proxy("p1", "m")], vec![key]);
        let result = engine
            .dispatch_chat(&token, "m".to_string(), ChatRequest::default())
            .await;
        assert!(matches!(result, Err(EngineError::AllProvidersFailed { .. })));
    }

    #[tokio::test]
    async fn list_models_filters_by_key_allow_list() {
        let (mut key, token) = issued();
        key.allowed_models = Some(vec!["only-this".to_string()]);
        let (engine, _) = engine(
            vec![provider_with_proxy("p1", "only-this"), provider_with_proxy("p2", "not-this")],
            vec![key],
        );
        let list = engine.list_models(&token).await.unwrap();
        assert_eq!(list.data.len(), 1);
        assert_eq!(list.data[0].id, "only-this");
    }
}
