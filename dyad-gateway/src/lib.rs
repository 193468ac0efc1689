//! HTTP surface for the dyad dispatch engine.
//!
//! This crate is thin by design: `dyad_engine::Engine` owns authentication, authorization,
//! rate limiting, provider resolution, retries, circuit breaking, and streaming. This crate's
//! job is to load configuration, stand up an `Engine` with in-memory backing stores, and expose
//! it over an OpenAI-compatible Axum API.
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration loading, environment overrides, validation
//! - [`registry`] — in-memory `ProviderRegistry` and `ApiKeyStore` implementations
//! - [`gateway_error`] — maps `dyad_engine::EngineError` onto HTTP responses
//! - [`middleware`] — CORS, bearer-token extraction, logging, metrics
//! - [`handlers`] — the `/v1/*`, `/health`, `/metrics`, and `/admin/*` endpoints
//! - [`server`] — wires everything above into an `axum::Router`
//!
//! ## Quick start
//!
//! ```no_run
//! use dyad_gateway::{config::Config, server::create_server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml")?;
//!     let app = create_server(config).await?;
//!     let listener = tokio::net::TcpListener::bind(("127.0.0.1", 3000)).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod gateway_error;
pub mod handlers;
pub mod middleware;
pub mod registry;
pub mod server;

pub use server::create_server;
