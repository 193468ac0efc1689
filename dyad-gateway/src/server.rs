//! HTTP server wiring: builds the `dyad_engine::Engine`, the in-memory registry/key store that
//! back it, and the Axum router those handlers run against.
//!
//! Grounded on the teacher's `create_server`/`AppState` pattern, narrowed from a five-field
//! `AppState` (config, SDK client, plugin manager, cache manager, websocket manager) down to
//! just `config` and `engine` — everything the teacher split across those extra fields now
//! lives inside `Engine` or one of its collaborators.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use dyad_engine::api_key::{issue_key, ApiKey, ApiKeyStore, Permission, RateLimits};
use dyad_engine::circuit_breaker::CircuitBreakerConfig;
use dyad_engine::credentials::CredentialService;
use dyad_engine::health::HealthMonitor;
use dyad_engine::metrics::MetricsSink;
use dyad_engine::provider::{Provider, ProviderRegistry};
use dyad_engine::rate_limiter::RateLimiter;
use dyad_engine::secrets::InMemorySecretsProvider;
use dyad_engine::Engine;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use crate::config::{BootstrapKeyConfig, Config};
use crate::handlers;
use crate::middleware::{auth_middleware, cors_layer, logging_middleware, metrics_middleware};
use crate::registry::{InMemoryApiKeyStore, InMemoryProviderRegistry};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<Engine>,
}

fn parse_permission(raw: &str) -> anyhow::Result<Permission> {
    match raw {
        "chat" => Ok(Permission::Chat),
        "embeddings" => Ok(Permission::Embeddings),
        "models" => Ok(Permission::Models),
        "admin" => Ok(Permission::Admin),
        other => Err(anyhow::anyhow!("unknown permission: {other}")),
    }
}

fn mint_bootstrap_key(cfg: &BootstrapKeyConfig) -> anyhow::Result<ApiKey> {
    let permissions: HashSet<Permission> = cfg
        .permissions
        .iter()
        .map(|p| parse_permission(p))
        .collect::<anyhow::Result<_>>()?;

    let mut issued = issue_key(
        &cfg.user_id,
        permissions,
        RateLimits {
            requests_per_minute: cfg.requests_per_minute,
            requests_per_day: cfg.requests_per_day,
            tokens_per_minute: cfg.tokens_per_minute,
            tokens_per_day: cfg.tokens_per_day,
        },
    );
    issued.record.allowed_models = cfg.allowed_models.clone();
    issued.record.allowed_providers = cfg.allowed_providers.clone();

    info!(
        user_id = %cfg.user_id,
        prefix = %issued.record.prefix,
        "minted bootstrap API key {} (copy it now, it is never logged again)",
        issued.plaintext
    );

    Ok(issued.record)
}

/// Builds the engine, its collaborators, and the Axum router in one pass.
pub async fn create_server(config: Config) -> anyhow::Result<Router> {
    let providers: Vec<Provider> = config.providers.iter().cloned().map(Into::into).collect();
    let registry = Arc::new(InMemoryProviderRegistry::new(providers));

    let api_keys: anyhow::Result<Vec<ApiKey>> =
        config.bootstrap_keys.iter().map(mint_bootstrap_key).collect();
    let api_key_store = Arc::new(InMemoryApiKeyStore::new(api_keys?));

    let secrets = Arc::new(InMemorySecretsProvider::new(config.engine.secrets_production_mode)?);
    let credentials = Arc::new(CredentialService::new(
        secrets,
        config.engine.credential_cache_size,
        config.engine.credential_cache_ttl,
        config.engine.allow_env_credential_fallback,
    ));

    let rate_limiter = Arc::new(RateLimiter::new());
    let metrics = Arc::new(MetricsSink::new());

    let engine = Arc::new(Engine::new(
        registry.clone() as Arc<dyn ProviderRegistry>,
        api_key_store as Arc<dyn ApiKeyStore>,
        credentials,
        rate_limiter,
        metrics,
        CircuitBreakerConfig {
            failure_threshold: config.engine.circuit_breaker_failure_threshold,
            reset_timeout: config.engine.circuit_breaker_reset_timeout,
        },
        config.engine.default_deadline,
    ));

    let health_engine = engine.clone();
    let monitor = Arc::new(HealthMonitor::new(
        registry.clone() as Arc<dyn ProviderRegistry>,
        config.engine.health_probe_interval,
    ));
    let _health_handle = monitor.spawn(move |provider_id| health_engine.cached_adapter(provider_id));

    if config.server.cors.enabled && config.server.cors.allowed_origins.iter().any(|o| o == "*") {
        warn!("CORS is enabled with wildcard origins; restrict allowed_origins before going to production");
    }

    let state = AppState {
        config: Arc::new(config.clone()),
        engine,
    };

    let public = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics/prometheus", get(handlers::prometheus_metrics));

    let protected = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/embeddings", post(handlers::embeddings))
        .route("/v1/models", get(handlers::list_models))
        .route("/metrics", get(handlers::metrics))
        .route("/admin/providers", get(handlers::list_providers))
        .route(
            "/admin/circuit-breakers/:provider_id",
            get(handlers::circuit_breaker_status),
        )
        .route(
            "/admin/circuit-breakers/:provider_id/reset",
            post(handlers::reset_circuit_breaker),
        )
        .layer(axum::middleware::from_fn(auth_middleware));

    let app = public
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(cors_layer(&config.server.cors))
                .layer(axum::middleware::from_fn(logging_middleware))
                .layer(axum::middleware::from_fn(metrics_middleware))
                .layer(TimeoutLayer::new(config.server.timeout)),
        )
        .with_state(state);

    Ok(app)
}
