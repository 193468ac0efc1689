//! Error taxonomy for the dispatch engine.
//!
//! Three enums cover the engine's failure surface:
//! - [`AdapterError`]: what an individual [`crate::adapters::AdapterRuntime`] invocation can
//!   fail with. Internal to C3/C4; the dispatcher folds these into [`EngineError::Provider`]
//!   after consulting [`counts_as_failure`] for circuit-breaker accounting.
//! - [`SecretsError`]: failure modes of [`crate::secrets::SecretsProvider`].
//! - [`EngineError`]: the taxonomy surfaced by the [`crate::dispatcher::Dispatcher`], one
//!   variant per error kind named in the dispatch design (client, auth, rate limit, provider,
//!   circuit-open, configuration, protocol, composite all-providers-failed, overloaded,
//!   internal). A gateway binding maps this to HTTP status; the engine itself never leaks an
//!   HTTP concept.

use thiserror::Error;

/// Failure of a single adapter invocation, before circuit-breaker / fallback accounting.
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("process exited with status {code}: {stderr_tail}")]
    Process { code: i32, stderr_tail: String },

    #[error("adapter configuration invalid: {message}")]
    Configuration { message: String },

    #[error("adapter produced a malformed response: {message}")]
    Protocol { message: String },

    #[error("sandbox error: {0}")]
    Sandbox(#[from] crate::sandbox::SandboxError),

    #[error("adapter is at capacity")]
    Overloaded,

    #[error("operation cancelled")]
    Cancelled,
}

impl AdapterError {
    /// Whether this outcome should be counted as a circuit-breaker failure.
    ///
    /// Per the breaker's failure classification: timeouts, connection errors, 5xx, and
    /// non-zero process exits count. Deliberate cancellation and non-429 4xx responses
    /// (client error, not provider failure) do not.
    pub fn counts_as_failure(&self) -> bool {
        match self {
            AdapterError::Network(_) => true,
            AdapterError::Timeout => true,
            AdapterError::Process { .. } => true,
            AdapterError::Sandbox(_) => true,
            AdapterError::Upstream { status, .. } => *status >= 500 || *status == 429,
            AdapterError::Configuration { .. } => false,
            AdapterError::Protocol { .. } => true,
            AdapterError::Overloaded => false,
            AdapterError::Cancelled => false,
        }
    }
}

/// Failure of a [`crate::secrets::SecretsProvider`] call.
#[derive(Error, Debug, Clone)]
pub enum SecretsError {
    #[error("secrets backend unavailable")]
    Unavailable,

    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("permission denied for secret: {0}")]
    PermissionDenied(String),

    #[error("integrity check failed for secret: {0}")]
    IntegrityFailure(String),
}

/// The engine-level error taxonomy surfaced by the dispatcher.
///
/// Kinds, not concrete type names, mirror the design doc's error-handling section: each
/// variant here is one of those kinds. A gateway binding is responsible for turning this
/// into an HTTP response; nothing in this enum assumes HTTP.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed request, unknown model, or similar 4xx-shaped client mistake.
    #[error("invalid request: {message}")]
    Client { message: String },

    /// Missing, invalid, or expired API key.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// Authenticated key lacks the permission required for this request kind.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// A rate-limit bucket was exhausted. `retry_after` is the earliest instant (as a
    /// duration from now) at which the request could succeed.
    #[error("rate limit exceeded: {reason}")]
    RateLimit {
        reason: String,
        retry_after: std::time::Duration,
    },

    /// A single provider's adapter failed. Counted toward that provider's circuit breaker
    /// and may trigger fallback to the next candidate.
    #[error("provider error: {0}")]
    Provider(#[from] AdapterError),

    /// Dispatch was blocked because the provider's circuit is open. Surfaced to the client
    /// only when every fallback candidate is also open.
    #[error("circuit open for provider {provider_id}")]
    CircuitOpen { provider_id: String },

    /// A provider record is malformed in a way that makes it permanently undispatchable
    /// (e.g. a `local` adapter with a public URL and `allow_remote=false`).
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Every candidate provider for this request failed. Carries one cause per attempted
    /// provider so the client sees the full picture.
    #[error("all providers failed: {}", causes.iter().map(|(id, e)| format!("{id}: {e}")).collect::<Vec<_>>().join("; "))]
    AllProvidersFailed { causes: Vec<(String, AdapterError)> },

    /// Sandbox process queue or global concurrency ceiling exhausted.
    #[error("overloaded: {message}")]
    Overloaded { message: String },

    /// Unexpected internal failure. Never surfaces raw detail to the client.
    #[error("internal error")]
    Internal {
        #[source]
        source: anyhow::Error,
    },
}

impl EngineError {
    pub fn internal<E: Into<anyhow::Error>>(source: E) -> Self {
        EngineError::Internal {
            source: source.into(),
        }
    }
}

impl From<SecretsError> for EngineError {
    fn from(value: SecretsError) -> Self {
        match value {
            SecretsError::NotFound(name) => EngineError::Configuration {
                message: format!("secret not found: {name}"),
            },
            other => EngineError::internal(anyhow::anyhow!(other)),
        }
    }
}
