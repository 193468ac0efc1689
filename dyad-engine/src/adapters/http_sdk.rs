//! The `http-sdk` adapter: a remote HTTP API reached over `reqwest`.
//!
//! Built directly on the teacher's `HttpProviderClient` idiom (`providers/http_client.rs`):
//! a reqwest client with default headers, a `build_url` that handles both absolute and
//! relative paths, and `map_error_response` translating HTTP status into a typed error.
//! Retry/backoff is grounded on `client.rs`'s `execute_with_enhanced_retry` (exponential
//! backoff, capped delay) but re-scoped to this adapter's own configured
//! `retryable_status_codes`/`retry_attempts`/`retry_base_delay`/`retry_max_delay`.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;

use crate::adapters::{AdapterResponse, AdapterRuntime, InvocationContext, NormalizedRequest, RequestKind};
use crate::credentials::CredentialService;
use crate::error::AdapterError;
use crate::models::StreamChunk;
use crate::provider::{AdapterConfig, AuthHeader};

pub struct HttpSdkAdapter {
    provider_id: String,
    http: Client,
    base_url: String,
    chat_path: String,
    embeddings_path: Option<String>,
    auth_header: AuthHeader,
    credential_key: String,
    static_headers: std::collections::HashMap<String, String>,
    retry_attempts: u32,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
    retryable_status_codes: Vec<u16>,
    credentials: Arc<CredentialService>,
}

impl HttpSdkAdapter {
    pub fn new(
        provider_id: String,
        config: AdapterConfig,
        credentials: Arc<CredentialService>,
    ) -> Result<Self, AdapterError> {
        let AdapterConfig::HttpSdk {
            base_url,
            chat_path,
            embeddings_path,
            auth_header,
            credential_key,
            timeout,
            retry_attempts,
            retry_base_delay,
            retry_max_delay,
            retryable_status_codes,
            static_headers,
        } = config
        else {
            return Err(AdapterError::Configuration {
                message: "expected http-sdk adapter config".to_string(),
            });
        };

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Configuration {
                message: format!("failed to build http client: {e}"),
            })?;

        Ok(Self {
            provider_id,
            http,
            base_url,
            chat_path,
            embeddings_path,
            auth_header,
            credential_key,
            static_headers,
            retry_attempts,
            retry_base_delay,
            retry_max_delay,
            retryable_status_codes,
            credentials,
        })
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), path)
        }
    }

    async fn auth_header_value(&self) -> Result<(HeaderName, HeaderValue), AdapterError> {
        let secret = self
            .credentials
            .get(
                &crate::secrets::provider_credential_name(&self.provider_id, &self.credential_key),
                &self.provider_id,
                &self.credential_key,
            )
            .await
            .map_err(|e| AdapterError::Configuration {
                message: format!("failed to resolve credential: {e}"),
            })?;
        let token = String::from_utf8_lossy(&secret).to_string();
        match &self.auth_header {
            AuthHeader::Bearer => Ok((
                HeaderName::from_static("authorization"),
                HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
            )),
            AuthHeader::ApiKeyHeader { name } => Ok((
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| AdapterError::Configuration {
                    message: e.to_string(),
                })?,
                HeaderValue::from_str(&token).map_err(|e| AdapterError::Configuration {
                    message: e.to_string(),
                })?,
            )),
        }
    }

    async fn build_headers(&self) -> Result<HeaderMap, AdapterError> {
        let mut headers = HeaderMap::new();
        let (name, value) = self.auth_header_value().await?;
        headers.insert(name, value);
        for (k, v) in &self.static_headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                headers.insert(name, value);
            }
        }
        Ok(headers)
    }

    fn path_for(&self, kind: RequestKind) -> Result<&str, AdapterError> {
        match kind {
            RequestKind::Chat => Ok(&self.chat_path),
            RequestKind::Embeddings => self
                .embeddings_path
                .as_deref()
                .ok_or_else(|| AdapterError::Configuration {
                    message: "provider does not support embeddings".to_string(),
                }),
            RequestKind::ModelsList => Ok("/models"),
        }
    }

    async fn post_with_retry(
        &self,
        url: &str,
        body: &serde_json::Value,
        ctx: &InvocationContext,
    ) -> Result<reqwest::Response, AdapterError> {
        let mut attempt = 0u32;
        let mut delay = self.retry_base_delay;
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(AdapterError::Cancelled);
            }
            let headers = self.build_headers().await?;
            let send = self.http.post(url).headers(headers).json(body).send();
            let result = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(AdapterError::Cancelled),
                r = tokio::time::timeout(ctx.remaining().min(Duration::from_secs(300)), send) => r,
            };

            let response = match result {
                Err(_) => Err(AdapterError::Timeout),
                Ok(Err(e)) => Err(AdapterError::Network(e.to_string())),
                Ok(Ok(resp)) => {
                    if resp.status().is_success() {
                        return Ok(resp);
                    }
                    let status = resp.status().as_u16();
                    let message = resp.text().await.unwrap_or_default();
                    Err(AdapterError::Upstream { status, message })
                }
            };

            let retryable = match &response {
                Err(AdapterError::Timeout) | Err(AdapterError::Network(_)) => true,
                Err(AdapterError::Upstream { status, .. }) => {
                    self.retryable_status_codes.contains(status)
                }
                _ => false,
            };

            if !retryable || attempt >= self.retry_attempts {
                return response;
            }
            attempt += 1;
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.retry_max_delay);
        }
    }
}

#[async_trait]
impl AdapterRuntime for HttpSdkAdapter {
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        request: NormalizedRequest,
    ) -> Result<crate::adapters::AdapterResponse, AdapterError> {
        let path = self.path_for(request.kind)?;
        let url = self.build_url(path);

        if !request.streaming {
            let response = self.post_with_retry(&url, &request.payload, ctx).await?;
            let value = response.json::<serde_json::Value>().await.map_err(|e| {
                AdapterError::Protocol {
                    message: format!("failed to parse upstream response: {e}"),
                }
            })?;
            return Ok(AdapterResponse::Complete(value));
        }

        let response = self.post_with_retry(&url, &request.payload, ctx).await?;
        let cancel = ctx.cancel.clone();
        let byte_stream = response.bytes_stream();
        let stream = stream! {
            use futures::StreamExt;
            let mut byte_stream = Box::pin(byte_stream);
            let mut buffer = String::new();
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    n = byte_stream.next() => n,
                };
                let Some(chunk) = next else { break };
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(AdapterError::Network(e.to_string()));
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    let Some(data) = line.strip_prefix("data: ") else { continue };
                    if data == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(parsed) => yield Ok(parsed),
                        Err(e) => yield Err(AdapterError::Protocol { message: e.to_string() }),
                    }
                }
            }
        };
        Ok(AdapterResponse::Stream(Box::pin(stream)))
    }

    async fn health_probe(&self) -> Result<(), String> {
        let url = self.build_url("/models");
        let headers = self
            .build_headers()
            .await
            .map_err(|e| e.to_string())?;
        self.http
            .get(&url)
            .headers(headers)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map_err(|e| e.to_string())
            .and_then(|resp| {
                if resp.status().is_success() {
                    Ok(())
                } else {
                    Err(format!("status {}", resp.status()))
                }
            })
    }
}
