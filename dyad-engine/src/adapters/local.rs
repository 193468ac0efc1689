//! The `local` adapter: an unauthenticated OpenAI-shaped HTTP endpoint, typically a loopback
//! inference server (Ollama, llama.cpp's server mode, vLLM). Shares the `http-sdk` adapter's
//! wire framing but skips credential resolution entirely; the loopback-or-`allow_remote`
//! constraint is enforced once at load time by `AdapterConfig::validate`.

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use reqwest::Client;

use crate::adapters::{AdapterResponse, AdapterRuntime, InvocationContext, NormalizedRequest, RequestKind};
use crate::error::AdapterError;
use crate::models::StreamChunk;
use crate::provider::AdapterConfig;

pub struct LocalAdapter {
    http: Client,
    base_url: String,
    chat_path: String,
    embeddings_path: Option<String>,
}

impl LocalAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, AdapterError> {
        let AdapterConfig::Local {
            base_url,
            chat_path,
            embeddings_path,
            timeout,
            ..
        } = config
        else {
            return Err(AdapterError::Configuration {
                message: "expected local adapter config".to_string(),
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
            base_url,
            chat_path,
            embeddings_path,
        })
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), path)
        }
    }

    fn path_for(&self, kind: RequestKind) -> Result<&str, AdapterError> {
        match kind {
            RequestKind::Chat => Ok(&self.chat_path),
            RequestKind::Embeddings => self
                .embeddings_path
                .as_deref()
                .ok_or_else(|| AdapterError::Configuration {
                    message: "local provider does not support embeddings".to_string(),
                }),
            RequestKind::ModelsList => Ok("/models"),
        }
    }
}

#[async_trait]
impl AdapterRuntime for LocalAdapter {
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        request: NormalizedRequest,
    ) -> Result<AdapterResponse, AdapterError> {
        let url = self.build_url(self.path_for(request.kind)?);
        let send = self.http.post(&url).json(&request.payload).send();

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
        let url = self.build_url("/models");
        self.http
            .get(&url)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_config_variant() {
        let cfg = AdapterConfig::Proxy {
            proxy_url: "http://x".to_string(),
            header_rewrites: Default::default(),
            remove_headers: vec![],
            timeout: Duration::from_secs(1),
        };
        assert!(LocalAdapter::new(cfg).is_err());
    }
}
