//! Configuration loading: TOML file plus environment overrides, validated before use.
//!
//! Shaped after the teacher's `Config::load` → `apply_env_overrides` → `validate` pipeline,
//! narrowed to what this gateway owns. Provider and credential configuration is no longer part
//! of `Config` proper — `ProviderConfig` here is a TOML-friendly staging struct converted into
//! `dyad_engine::provider::Provider` at startup, and credentials are resolved through
//! `dyad_engine::secrets::SecretsProvider`, never read directly off disk by this module.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use dyad_engine::provider::{AdapterConfig, ModelMapping, Provider, RateLimitHints};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub bootstrap_keys: Vec<BootstrapKeyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "dyad_engine::common::duration_serde")]
    pub timeout: Duration,
    pub max_body_size: usize,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "OPTIONS".to_string(),
            ],
            allowed_headers: vec!["*".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Everything `dyad_engine::Engine::new` needs besides the registry/store/credentials seams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub circuit_breaker_failure_threshold: u32,
    #[serde(with = "dyad_engine::common::duration_serde")]
    pub circuit_breaker_reset_timeout: Duration,
    #[serde(with = "dyad_engine::common::duration_serde")]
    pub default_deadline: Duration,
    pub credential_cache_size: usize,
    #[serde(with = "dyad_engine::common::duration_serde")]
    pub credential_cache_ttl: Duration,
    pub allow_env_credential_fallback: bool,
    /// Passed straight to `InMemorySecretsProvider::new`; `true` makes construction fail, so
    /// a real deployment supplying its own KMS-backed `SecretsProvider` sets this and swaps
    /// the in-memory store out before startup finishes.
    pub secrets_production_mode: bool,
    #[serde(with = "dyad_engine::common::duration_serde")]
    pub health_probe_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_reset_timeout: Duration::from_secs(5 * 60),
            default_deadline: Duration::from_secs(60),
            credential_cache_size: 256,
            credential_cache_ttl: Duration::from_secs(5 * 60),
            allow_env_credential_fallback: true,
            secrets_production_mode: false,
            health_probe_interval: Duration::from_secs(30),
        }
    }
}

/// TOML-friendly staging struct for a provider record; converts into
/// `dyad_engine::provider::Provider` once loaded (health status always starts `Unknown`, so
/// it isn't representable on the wire here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub slug: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub models: Vec<ModelMapping>,
    #[serde(default)]
    pub credential_refs: Vec<String>,
    #[serde(default)]
    pub rate_limit_hints: Option<RateLimitHints>,
    #[serde(default)]
    pub priority: u32,
}

fn default_true() -> bool {
    true
}

impl From<ProviderConfig> for Provider {
    fn from(p: ProviderConfig) -> Self {
        Provider {
            id: p.id,
            slug: p.slug,
            name: p.name,
            enabled: p.enabled,
            adapter: p.adapter,
            models: p.models,
            credential_refs: p.credential_refs,
            rate_limit_hints: p.rate_limit_hints,
            priority: p.priority,
            health_status: Default::default(),
        }
    }
}

/// A key to mint at startup, since plaintext secrets have no business living in a config file.
/// The issued plaintext is logged once at startup (never persisted) so an operator can copy it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapKeyConfig {
    pub user_id: String,
    pub permissions: Vec<String>,
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
    pub tokens_per_minute: u32,
    pub tokens_per_day: u32,
    #[serde(default)]
    pub allowed_models: Option<Vec<String>>,
    #[serde(default)]
    pub allowed_providers: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            engine: EngineConfig::default(),
            providers: Vec::new(),
            bootstrap_keys: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {path}: {e}"))?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {path}: {e}"))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// `GATEWAY_HOST`, `GATEWAY_PORT`, `GATEWAY_TIMEOUT`, `GATEWAY_LOG_LEVEL` — the same four
    /// knobs the teacher exposes for its server/logging sections, narrowed to what survives
    /// here now that provider credentials flow through `SecretsProvider` instead.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("GATEWAY_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port_str) = env::var("GATEWAY_PORT") {
            self.server.port = port_str
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid GATEWAY_PORT: {port_str}"))?;
        }
        if let Ok(timeout_str) = env::var("GATEWAY_TIMEOUT") {
            self.server.timeout = parse_duration(&timeout_str)?;
        }
        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            let valid = ["trace", "debug", "info", "warn", "error"];
            if !valid.contains(&level.as_str()) {
                return Err(anyhow::anyhow!("invalid GATEWAY_LOG_LEVEL: {level}"));
            }
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_server()?;
        self.validate_providers()?;
        self.validate_engine()?;
        Ok(())
    }

    fn validate_server(&self) -> anyhow::Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("server host cannot be empty"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server port must be nonzero"));
        }
        if self.server.max_body_size == 0 {
            return Err(anyhow::anyhow!("server max_body_size must be nonzero"));
        }
        Ok(())
    }

    fn validate_providers(&self) -> anyhow::Result<()> {
        if self.providers.is_empty() {
            return Err(anyhow::anyhow!("at least one provider must be configured"));
        }
        let mut seen = HashMap::new();
        for p in &self.providers {
            if seen.insert(p.id.clone(), ()).is_some() {
                return Err(anyhow::anyhow!("duplicate provider id: {}", p.id));
            }
            p.adapter
                .validate()
                .map_err(|e| anyhow::anyhow!("provider {}: {e}", p.id))?;
        }
        Ok(())
    }

    fn validate_engine(&self) -> anyhow::Result<()> {
        if self.engine.circuit_breaker_failure_threshold == 0 {
            return Err(anyhow::anyhow!(
                "engine.circuit_breaker_failure_threshold must be nonzero"
            ));
        }
        if self.engine.credential_cache_size == 0 {
            return Err(anyhow::anyhow!("engine.credential_cache_size must be nonzero"));
        }
        Ok(())
    }
}

pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    dyad_engine::common::parse_duration(s).map_err(|e| anyhow::anyhow!(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dyad_engine::provider::AdapterConfig as AC;

    fn sample_provider() -> ProviderConfig {
        ProviderConfig {
            id: "openai".to_string(),
            slug: "openai".to_string(),
            name: "OpenAI".to_string(),
            enabled: true,
            adapter: AC::HttpSdk {
                base_url: "https://api.openai.com".to_string(),
                chat_path: "/v1/chat/completions".to_string(),
                embeddings_path: Some("/v1/embeddings".to_string()),
                auth_header: dyad_engine::provider::AuthHeader::Bearer,
                credential_key: "api_key".to_string(),
                timeout: Duration::from_secs(30),
                retry_attempts: 2,
                retry_base_delay: Duration::from_millis(200),
                retry_max_delay: Duration::from_secs(5),
                retryable_status_codes: vec![429, 500, 502, 503],
                static_headers: Default::default(),
            },
            models: vec![],
            credential_refs: vec!["api_key".to_string()],
            rate_limit_hints: None,
            priority: 0,
        }
    }

    #[test]
    fn default_config_fails_validation_without_providers() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_with_one_provider_passes_validation() {
        let mut config = Config::default();
        config.providers.push(sample_provider());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn duplicate_provider_ids_are_rejected() {
        let mut config = Config::default();
        config.providers.push(sample_provider());
        config.providers.push(sample_provider());
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_port_fails_validation() {
        let mut config = Config::default();
        config.providers.push(sample_provider());
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply_on_top_of_defaults() {
        let mut config = Config::default();
        std::env::set_var("GATEWAY_HOST", "0.0.0.0");
        std::env::set_var("GATEWAY_PORT", "8080");
        std::env::set_var("GATEWAY_LOG_LEVEL", "debug");
        config.apply_env_overrides().unwrap();
        std::env::remove_var("GATEWAY_HOST");
        std::env::remove_var("GATEWAY_PORT");
        std::env::remove_var("GATEWAY_LOG_LEVEL");

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn invalid_log_level_override_is_rejected() {
        let mut config = Config::default();
        std::env::set_var("GATEWAY_LOG_LEVEL", "not-a-level");
        let result = config.apply_env_overrides();
        std::env::remove_var("GATEWAY_LOG_LEVEL");
        assert!(result.is_err());
    }

    #[test]
    fn provider_config_converts_into_engine_provider() {
        let provider: Provider = sample_provider().into();
        assert_eq!(provider.id, "openai");
        assert_eq!(provider.adapter.kind(), "http-sdk");
    }
}
