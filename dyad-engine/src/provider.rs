//! The provider data model and the `ProviderRegistry` seam.
//!
//! `Provider` records are owned by an external admin surface; the engine only reads them and
//! reacts to invalidation notifications. `AdapterConfig` is a tagged union, one variant per
//! adapter shape, so a provider's configuration can never carry fields that don't apply to
//! its own kind — the dispatcher never has to guard against an "impossible" combination.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type ProviderId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub slug: String,
    pub name: String,
    pub enabled: bool,
    pub adapter: AdapterConfig,
    pub models: Vec<ModelMapping>,
    pub credential_refs: Vec<String>,
    pub rate_limit_hints: Option<RateLimitHints>,
    pub priority: u32,
    #[serde(skip)]
    pub health_status: HealthStatus,
}

impl Provider {
    pub fn model(&self, dyad_model_id: &str) -> Option<&ModelMapping> {
        self.models.iter().find(|m| m.dyad_model_id == dyad_model_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMapping {
    pub dyad_model_id: String,
    pub adapter_model_id: String,
    pub max_tokens: u32,
    pub context_window: u32,
    pub supports_streaming: bool,
    pub supports_embeddings: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitHints {
    pub requests_per_minute: Option<u32>,
    pub tokens_per_minute: Option<u32>,
}

/// Per-adapter-kind configuration, discriminated by `type` on the wire.
///
/// See spec §9's design note on this: a tagged variant per adapter kind, each carrying
/// exactly its required fields, validated at provider load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AdapterConfig {
    HttpSdk {
        base_url: String,
        chat_path: String,
        embeddings_path: Option<String>,
        auth_header: AuthHeader,
        credential_key: String,
        #[serde(with = "crate::common::duration_serde")]
        timeout: Duration,
        retry_attempts: u32,
        #[serde(with = "crate::common::duration_serde")]
        retry_base_delay: Duration,
        #[serde(with = "crate::common::duration_serde")]
        retry_max_delay: Duration,
        retryable_status_codes: Vec<u16>,
        #[serde(default)]
        static_headers: HashMap<String, String>,
    },
    Proxy {
        proxy_url: String,
        #[serde(default)]
        header_rewrites: HashMap<String, String>,
        #[serde(default)]
        remove_headers: Vec<String>,
        #[serde(with = "crate::common::duration_serde")]
        timeout: Duration,
    },
    Local {
        base_url: String,
        chat_path: String,
        embeddings_path: Option<String>,
        allow_remote: bool,
        #[serde(with = "crate::common::duration_serde")]
        timeout: Duration,
    },
    SpawnCli {
        command: String,
        args: Vec<String>,
        docker_sandbox: bool,
        sandbox: Option<SandboxConfig>,
        #[serde(with = "crate::common::duration_serde")]
        timeout: Duration,
    },
}

impl AdapterConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterConfig::HttpSdk { .. } => "http-sdk",
            AdapterConfig::Proxy { .. } => "proxy",
            AdapterConfig::Local { .. } => "local",
            AdapterConfig::SpawnCli { .. } => "spawn-cli",
        }
    }

    /// Validated at provider load so the dispatcher never sees a half-built config.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            AdapterConfig::Local {
                base_url,
                allow_remote,
                ..
            } => {
                if !allow_remote && !is_loopback_or_private(base_url) {
                    return Err(format!(
                        "local adapter base_url {base_url} is not loopback/private and allow_remote is false"
                    ));
                }
                Ok(())
            }
            AdapterConfig::SpawnCli { command, .. } if command.trim().is_empty() => {
                Err("spawn-cli adapter requires a non-empty command".to_string())
            }
            _ => Ok(()),
        }
    }
}

fn is_loopback_or_private(url: &str) -> bool {
    let host = url
        .split("://")
        .nth(1)
        .unwrap_or(url)
        .split(['/', ':'])
        .next()
        .unwrap_or("");
    host == "localhost"
        || host.starts_with("127.")
        || host.starts_with("10.")
        || host.starts_with("192.168.")
        || host.starts_with("172.16.")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuthHeader {
    Bearer,
    ApiKeyHeader { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub memory_limit: String,
    pub cpu_limit: String,
    pub timeout_seconds: u64,
    pub uid: u32,
    pub allow_network: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum HealthState {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HealthStatus {
    pub state: HealthState,
    pub last_checked: Option<chrono::DateTime<chrono::Utc>>,
    pub reason: Option<String>,
}

/// Read model over provider records, owned by an external admin surface.
///
/// The engine only reads through this trait and reacts to `invalidate` notifications; it
/// never mutates a `Provider` record itself (health status updates are communicated back via
/// `update_health`, a narrow write the registry is free to implement as a cache update rather
/// than a durable write).
#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    async fn get(&self, id: &ProviderId) -> Option<Provider>;
    async fn list_enabled(&self) -> Vec<Provider>;
    async fn list_serving_model(&self, dyad_model_id: &str) -> Vec<Provider>;
    async fn update_health(&self, id: &ProviderId, status: HealthStatus);
}
