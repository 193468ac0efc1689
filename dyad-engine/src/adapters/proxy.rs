//! The `proxy` adapter: raw pass-through to an upstream that already speaks the wire protocol
//! the client used, per spec §4.3. No request/response translation beyond header rewriting —
//! grounded on the teacher's `http_client.rs` reqwest usage, stripped of the SDK-shape
//! normalization the `http-sdk` adapter does.

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;

use crate::adapters::{AdapterResponse, AdapterRuntime, InvocationContext, NormalizedRequest};
use crate::error::AdapterError;
use crate::models::StreamChunk;
use crate::provider::AdapterConfig;

pub struct ProxyAdapter {
    http: Client,
    proxy_url: String,
    header_rewrites: std::collections::HashMap<String, String>,
    remove_headers: Vec<String>,
}

impl ProxyAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, AdapterError> {
        let AdapterConfig::Proxy {
            proxy_url,
            header_rewrites,
            remove_headers,
            timeout,
        } = config
        else {
            return Err(AdapterError::Configuration {
                message: "expected proxy adapter config".to_string(),
            });
        };

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Configuration {
                message: format!("failed to build http client: {e}"),
            })?;

        Ok(Self {
            http,
            proxy_url,
            header_rewrites,
            remove_headers,
        })
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in &self.header_rewrites {
            if self.remove_headers.iter().any(|r| r.eq_ignore_ascii_case(k)) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                headers.insert(name, value);
            }
        }
        headers
    }
}

#[async_trait]
impl AdapterRuntime for ProxyAdapter {
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        request: NormalizedRequest,
    ) -> Result<AdapterResponse, AdapterError> {
        let send = self
            .http
            .post(&self.proxy_url)
            .headers(self.build_headers())
            .json(&request.payload)
            .send();

        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(AdapterError::Cancelled),
            r = tokio::time::timeout(ctx.remaining().min(Duration::from_secs(300)), send) => r,
        };

        let response = match response {
            Err(_) => return Err(AdapterError::Timeout),
            Ok(Err(e)) => return Err(AdapterError::Network(e.to_string())),
            Ok(Ok(resp)) => resp,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(AdapterError::Upstream { status, message });
        }

        if !request.streaming {
            let value = response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| AdapterError::Protocol {
                    message: format!("failed to parse upstream response: {e}"),
                })?;
            return Ok(AdapterResponse::Complete(value));
        }

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
        self.http
            .get(&self.proxy_url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
