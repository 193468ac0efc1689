//! AdapterRuntime (C3): the uniform invocation layer over the four adapter shapes.
//!
//! Generalizes the teacher's `trait Provider` (`providers/mod.rs`) — same async-trait shape,
//! same "unsupported capability errors by default" idiom — but keyed by adapter *shape*
//! rather than vendor name. This replaces the teacher's `create_provider()` factory (which
//! matched on strings like `"openai"`/`"anthropic"`/`"groq"`) with a four-arm match over
//! [`crate::provider::AdapterConfig`].

pub mod http_sdk;
pub mod local;
pub mod proxy;
pub mod spawn_cli;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::credentials::CredentialService;
use crate::error::AdapterError;
use crate::models::StreamChunk;
use crate::provider::{AdapterConfig, Provider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Chat,
    Embeddings,
    ModelsList,
}

/// A request normalized to the OpenAI wire shape, ready for an adapter's
/// `normalize_request` to translate into whatever the upstream actually expects.
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    pub kind: RequestKind,
    pub payload: serde_json::Value,
    pub streaming: bool,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, AdapterError>> + Send>>;

pub enum AdapterResponse {
    Complete(serde_json::Value),
    Stream(ChunkStream),
}

/// Per-invocation deadline and cancellation, honored at every suspension point inside an
/// adapter (HTTP read/write, child-process I/O, timer waits) per spec §5.
#[derive(Clone)]
pub struct InvocationContext {
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl InvocationContext {
    pub fn remaining(&self) -> std::time::Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

#[async_trait]
pub trait AdapterRuntime: Send + Sync {
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        request: NormalizedRequest,
    ) -> Result<AdapterResponse, AdapterError>;

    /// A minimal request per adapter shape: `GET /models` for http-sdk/local, a one-token
    /// no-op completion with a 2s deadline for spawn-cli.
    async fn health_probe(&self) -> Result<(), String>;
}

/// Build the adapter for one provider record. Drops the teacher's vendor-enumeration
/// factory entirely: there is no per-vendor module here, only one implementation per
/// adapter shape.
pub fn build_adapter(
    provider: &Provider,
    credentials: Arc<CredentialService>,
) -> Result<Arc<dyn AdapterRuntime>, AdapterError> {
    provider
        .adapter
        .validate()
        .map_err(|message| AdapterError::Configuration { message })?;

    match &provider.adapter {
        AdapterConfig::HttpSdk { .. } => Ok(Arc::new(http_sdk::HttpSdkAdapter::new(
            provider.id.clone(),
            provider.adapter.clone(),
            credentials,
        )?)),
        AdapterConfig::Proxy { .. } => Ok(Arc::new(proxy::ProxyAdapter::new(
            provider.adapter.clone(),
        )?)),
        AdapterConfig::Local { .. } => Ok(Arc::new(local::LocalAdapter::new(
            provider.adapter.clone(),
        )?)),
        AdapterConfig::SpawnCli { .. } => Ok(Arc::new(spawn_cli::SpawnCliAdapter::new(
            provider.adapter.clone(),
        )?)),
    }
}
