//! # dyad-engine
//!
//! The request dispatch core of the dyad gateway: authentication, rate limiting, provider
//! resolution with fallback, per-provider circuit breaking, credential resolution, adapter
//! invocation across four adapter shapes (`http-sdk`, `proxy`, `local`, `spawn-cli`), OpenAI
//! SSE re-framing, and usage/metrics accounting.
//!
//! This crate owns no HTTP surface of its own — [`dispatcher::Engine`] is a plain async API a
//! binding crate (an Axum router, a CLI, a test harness) drives directly. `ProviderRegistry`
//! and `ApiKeyStore` are read/write seams the engine consumes but never implements; a binding
//! supplies concrete in-memory or externally-backed implementations.
//!
//! ## Quick start
//!
//! ```ignore
//! use dyad_engine::dispatcher::Engine;
//! use dyad_engine::models::{ChatRequest, Message};
//!
//! let response = engine
//!     .dispatch_chat(bearer_token, "gpt-4o".to_string(), ChatRequest {
//!         messages: vec![Message::user("Hello, world!")],
//!         ..Default::default()
//!     })
//!     .await?;
//! ```
//!
//! ## Module map
//!
//! - [`error`] — the `AdapterError` / `SecretsError` / `EngineError` taxonomy
//! - [`models`] — OpenAI-compatible wire types
//! - [`provider`] — `Provider`, `AdapterConfig`, the `ProviderRegistry` seam
//! - [`api_key`] — `ApiKey`, key issuance/verification, the `ApiKeyStore` seam
//! - [`secrets`] — the `SecretsProvider` seam and its in-memory implementation
//! - [`credentials`] — the LRU+TTL cache in front of `SecretsProvider`
//! - [`circuit_breaker`] — per-provider closed/open/half-open state
//! - [`rate_limiter`] — per-key request/token buckets
//! - [`resolver`] — fallback-policy-driven provider ordering
//! - [`metrics`] — counters and EWMA success-rate windows
//! - [`health`] — the background health-probing scheduler
//! - [`adapters`] — the uniform invocation layer over the four adapter shapes
//! - [`sandbox`] — resource-capped child process execution for `spawn-cli`
//! - [`stream_pipe`] — OpenAI SSE re-framing
//! - [`dispatcher`] — the `Engine` dependency-injection root and dispatch control flow

pub mod adapters;
pub mod api_key;
pub mod circuit_breaker;
pub mod common;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod metrics;
pub mod models;
pub mod provider;
pub mod rate_limiter;
pub mod resolver;
pub mod sandbox;
pub mod secrets;
pub mod stream_pipe;

pub use dispatcher::{DispatchOutcome, Engine};
pub use error::{AdapterError, EngineError, SecretsError};
pub use models::{ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, Message, Role};
pub use provider::{AdapterConfig, Provider, ProviderRegistry};
