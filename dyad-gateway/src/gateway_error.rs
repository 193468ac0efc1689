//! Maps `dyad_engine::EngineError` onto HTTP responses.
//!
//! Same `{"error":{"message","type","code"}}` body shape and per-variant status mapping the
//! teacher's error module uses, generalized from `ClientError`/`ProviderError` sub-matches to
//! `EngineError`/`AdapterError` ones. `RateLimit` additionally sets a `retry-after` header,
//! which the teacher's rate-limit variant never needed since it had no speculative-admission
//! concept to compute one from.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use dyad_engine::{AdapterError, EngineError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("invalid request: {0}")]
    BadRequest(String),
}

fn adapter_error_status(e: &AdapterError) -> (StatusCode, &'static str) {
    match e {
        AdapterError::Network(_) => (StatusCode::BAD_GATEWAY, "provider_network_error"),
        AdapterError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "provider_timeout"),
        AdapterError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "provider_error"),
        AdapterError::Process { .. } => (StatusCode::BAD_GATEWAY, "provider_process_error"),
        AdapterError::Configuration { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
        }
        AdapterError::Protocol { .. } => (StatusCode::BAD_GATEWAY, "provider_protocol_error"),
        AdapterError::Sandbox(_) => (StatusCode::SERVICE_UNAVAILABLE, "sandbox_error"),
        AdapterError::Overloaded => (StatusCode::SERVICE_UNAVAILABLE, "overloaded_error"),
        AdapterError::Cancelled => (
            StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT),
            "cancelled",
        ),
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error_type, message, retry_after) = match &self {
            GatewayError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", msg.clone(), None)
            }
            GatewayError::Engine(e) => match e {
                EngineError::Client { message } => {
                    (StatusCode::BAD_REQUEST, "invalid_request_error", message.clone(), None)
                }
                EngineError::Auth { message } => {
                    (StatusCode::UNAUTHORIZED, "authentication_error", message.clone(), None)
                }
                EngineError::PermissionDenied { message } => {
                    (StatusCode::FORBIDDEN, "permission_error", message.clone(), None)
                }
                EngineError::RateLimit { reason, retry_after } => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limit_error",
                    reason.clone(),
                    Some(*retry_after),
                ),
                EngineError::Provider(adapter_err) => {
                    let (status, error_type) = adapter_error_status(adapter_err);
                    (status, error_type, adapter_err.to_string(), None)
                }
                EngineError::CircuitOpen { provider_id } => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "provider_unavailable",
                    format!("circuit open for provider {provider_id}"),
                    None,
                ),
                EngineError::Configuration { message } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "configuration_error",
                    message.clone(),
                    None,
                ),
                EngineError::AllProvidersFailed { causes } => {
                    let message = format!(
                        "all providers failed: {}",
                        causes
                            .iter()
                            .map(|(id, e)| format!("{id}: {e}"))
                            .collect::<Vec<_>>()
                            .join("; ")
                    );
                    (StatusCode::BAD_GATEWAY, "provider_error", message, None)
                }
                EngineError::Overloaded { message } => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "overloaded_error",
                    message.clone(),
                    None,
                ),
                EngineError::Internal { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                    None,
                ),
            },
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
            }
        }));

        let mut response = (status, body).into_response();
        if let Some(retry_after) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn auth_error_maps_to_401() {
        let err = GatewayError::Engine(EngineError::Auth {
            message: "bad token".to_string(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rate_limit_sets_retry_after_header() {
        let err = GatewayError::Engine(EngineError::RateLimit {
            reason: "too many requests".to_string(),
            retry_after: Duration::from_secs(12),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("retry-after").unwrap(), "12");
    }

    #[tokio::test]
    async fn permission_denied_maps_to_403() {
        let err = GatewayError::Engine(EngineError::PermissionDenied {
            message: "no admin".to_string(),
        });
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn circuit_open_maps_to_503() {
        let err = GatewayError::Engine(EngineError::CircuitOpen {
            provider_id: "p1".to_string(),
        });
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn internal_error_never_leaks_source_detail() {
        let err = GatewayError::Engine(EngineError::internal(anyhow::anyhow!("secret detail")));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
