//! HTTP request handlers for the OpenAI-compatible surface this gateway exposes.
//!
//! Narrowed from the teacher's handler set (chat, completions, embeddings, images, audio,
//! dashboard, websockets) down to the endpoints SPEC_FULL.md actually names: chat completions
//! (streaming and non-streaming), embeddings, model listing, health, metrics, and a small admin
//! surface over circuit breaker state. Every handler is a thin translation layer — all real
//! work (auth, rate limiting, routing, retries) happens inside `dyad_engine::Engine`.

use std::io;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use dyad_engine::{ChatRequest, DispatchOutcome, EmbeddingRequest};
use futures::StreamExt;
use serde_json::json;

use crate::gateway_error::GatewayError;
use crate::middleware::BearerToken;
use crate::server::AppState;

/// `POST /v1/chat/completions`. Streams server-sent events when `request.stream` is true,
/// otherwise returns a single JSON body — mirroring the two response shapes OpenAI's API uses.
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(BearerToken(token)): Extension<BearerToken>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, GatewayError> {
    let model = request.model.clone();
    let outcome = state.engine.dispatch_chat(&token, model, request).await?;

    match outcome {
        DispatchOutcome::Complete(response) => Ok((StatusCode::OK, Json(response)).into_response()),
        DispatchOutcome::Stream(frames) => {
            let body_stream = frames.map(|frame_result| {
                frame_result
                    .map(|frame| frame.into_bytes())
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
            });
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/event-stream")
                .header("cache-control", "no-cache")
                .body(Body::from_stream(body_stream))
                .expect("static headers and streamed body always build a valid response"))
        }
    }
}

/// `POST /v1/embeddings`. Never streams — embeddings are returned whole once computed.
pub async fn embeddings(
    State(state): State<AppState>,
    Extension(BearerToken(token)): Extension<BearerToken>,
    Json(request): Json<EmbeddingRequest>,
) -> Result<Json<dyad_engine::EmbeddingResponse>, GatewayError> {
    let model = request.model.clone();
    let response = state.engine.dispatch_embeddings(&token, model, request).await?;
    Ok(Json(response))
}

/// `GET /v1/models`. Filtered to the models the caller's key is allowed to see.
pub async fn list_models(
    State(state): State<AppState>,
    Extension(BearerToken(token)): Extension<BearerToken>,
) -> Result<Json<dyad_engine::models::ModelList>, GatewayError> {
    let list = state.engine.list_models(&token).await?;
    Ok(Json(list))
}

/// `GET /health`. Unauthenticated liveness probe — says nothing about provider health.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /metrics`. JSON snapshot of per-provider request/latency/success-rate stats.
pub async fn metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshots = state.engine.metrics().all_snapshots();
    Json(json!({ "providers": snapshots }))
}

/// `GET /metrics/prometheus`. Unauthenticated so scrapers don't need a bearer token.
pub async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    let snapshots = state.engine.metrics().all_snapshots();
    let mut out = String::new();
    out.push_str("# HELP dyad_provider_requests_total Total dispatch attempts per provider.\n");
    out.push_str("# TYPE dyad_provider_requests_total counter\n");
    for snapshot in &snapshots {
        out.push_str(&format!(
            "dyad_provider_requests_total{{provider=\"{}\"}} {}\n",
            snapshot.provider_id, snapshot.requests
        ));
    }
    out.push_str("# HELP dyad_provider_success_rate_1m Rolling one-minute success rate.\n");
    out.push_str("# TYPE dyad_provider_success_rate_1m gauge\n");
    for snapshot in &snapshots {
        out.push_str(&format!(
            "dyad_provider_success_rate_1m{{provider=\"{}\"}} {}\n",
            snapshot.provider_id, snapshot.success_rate_1m
        ));
    }

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Body::from(out))
        .expect("static headers and plain-text body always build a valid response")
}

/// `GET /admin/providers`. Snapshot of every configured provider, not just enabled ones.
pub async fn list_providers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let providers: Vec<_> = state
        .config
        .providers
        .iter()
        .map(|p| {
            json!({
                "id": p.id,
                "name": p.name,
                "enabled": p.enabled,
                "priority": p.priority,
                "adapter_kind": p.adapter.kind(),
                "models": p.models.iter().map(|m| &m.dyad_model_id).collect::<Vec<_>>(),
            })
        })
        .collect();
    Json(json!({ "providers": providers }))
}

/// `GET /admin/circuit-breakers/:provider_id`. 404s for a provider with no breaker activity yet.
pub async fn circuit_breaker_status(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    match state.engine.circuit_status(&provider_id).await {
        Some(status) => Ok(Json(json!({
            "provider_id": provider_id,
            "state": format!("{:?}", status.state),
            "consecutive_failures": status.consecutive_failures,
        }))),
        None => Err(GatewayError::BadRequest(format!(
            "no circuit breaker activity recorded for provider {provider_id}"
        ))),
    }
}

/// `POST /admin/circuit-breakers/:provider_id/reset`. Forces a breaker back to closed.
pub async fn reset_circuit_breaker(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Json<serde_json::Value> {
    state.engine.reset_circuit(&provider_id).await;
    Json(json!({ "provider_id": provider_id, "reset": true }))
}
