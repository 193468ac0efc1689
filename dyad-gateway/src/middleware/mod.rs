//! HTTP middleware: CORS, bearer-token extraction, request logging, and per-request metrics.
//!
//! Narrowed from the teacher's seven-stage stack (timeout/CORS/logging/metrics/auth/input
//! validation/plugins) to the five ambient concerns SPEC_FULL.md keeps: CORS, auth, logging,
//! metrics, timeout. `dyad_engine::Engine` already authenticates, authorizes, and rate-limits
//! every dispatch call internally, so `auth_middleware` here only extracts the raw bearer
//! token — it never validates it itself. Input validation and plugin middleware are dropped;
//! request shape validation now happens where the wire types are deserialized.

use std::time::Instant;

use axum::body::Body;
use axum::http::{self, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::CorsConfig;
use crate::gateway_error::GatewayError;

/// The raw `Authorization: Bearer <token>` value, stashed in request extensions so handlers
/// can hand it straight to `Engine::dispatch_chat`/`dispatch_embeddings`/`list_models`.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Response {
    if req.method() == http::Method::OPTIONS {
        return next.run(req).await;
    }

    let header = req
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) if !token.trim().is_empty() => token.trim().to_string(),
        _ => {
            return GatewayError::Engine(dyad_engine::EngineError::Auth {
                message: "missing or malformed Authorization header".to_string(),
            })
            .into_response();
        }
    };

    req.extensions_mut().insert(BearerToken(token));
    next.run(req).await
}

pub async fn logging_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let request_id = uuid::Uuid::new_v4().to_string();

    let response = next.run(req).await;

    info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        latency_ms = start.elapsed().as_millis(),
        "request processed"
    );

    response
}

pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let path = req.uri().path().to_string();
    let method = req.method().to_string();

    let response = next.run(req).await;

    if !path.starts_with("/health") && !path.starts_with("/metrics") {
        let status = response.status().as_u16();
        let latency_ms = start.elapsed().as_millis();
        tracing::debug!(%method, %path, status, latency_ms, "request metrics");
    }

    response
}

pub fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    if !cors.enabled {
        return CorsLayer::new();
    }

    let mut layer = CorsLayer::new();
    if cors.allowed_origins.iter().any(|o| o == "*") {
        layer = layer.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = cors
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer = layer.allow_origin(origins);
    }
    layer.allow_methods(Any).allow_headers(Any)
}

pub fn unmatched_route() -> StatusCode {
    StatusCode::NOT_FOUND
}
