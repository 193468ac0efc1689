use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dyad_engine::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use dyad_engine::models::{ChatRequest, Message};
use dyad_engine::provider::{AdapterConfig, AuthHeader, ModelMapping, Provider};
use dyad_engine::rate_limiter::RateLimiter;
use dyad_engine::resolver::{FallbackPolicy, Resolver};
use dyad_engine::{api_key::RateLimits, metrics::MetricsSink};

fn sample_provider(id: &str, priority: u32) -> Provider {
    Provider {
        id: id.to_string(),
        slug: id.to_string(),
        name: id.to_string(),
        enabled: true,
        adapter: AdapterConfig::HttpSdk {
            base_url: "https://api.example.com".to_string(),
            chat_path: "/v1/chat/completions".to_string(),
            embeddings_path: None,
            auth_header: AuthHeader::Bearer,
            credential_key: "api_key".to_string(),
            timeout: Duration::from_secs(30),
            retry_attempts: 2,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(2),
            retryable_status_codes: vec![429, 500],
            static_headers: Default::default(),
        },
        models: vec![ModelMapping {
            dyad_model_id: "gpt-4o".to_string(),
            adapter_model_id: "gpt-4o".to_string(),
            max_tokens: 4096,
            context_window: 128_000,
            supports_streaming: true,
            supports_embeddings: false,
        }],
        credential_refs: vec!["api_key".to_string()],
        rate_limit_hints: None,
        priority,
        health_status: Default::default(),
    }
}

fn sample_key() -> dyad_engine::api_key::ApiKey {
    dyad_engine::api_key::issue_key(
        "bench-user",
        Default::default(),
        RateLimits {
            requests_per_minute: 1_000_000,
            requests_per_day: 1_000_000,
            tokens_per_minute: 1_000_000,
            tokens_per_day: 1_000_000,
        },
    )
    .record
}

fn bench_request_creation(c: &mut Criterion) {
    c.bench_function("chat_request_creation", |b| {
        b.iter(|| ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![
                Message::system("You are a helpful assistant."),
                Message::user("Hello, how are you?"),
            ],
            temperature: Some(0.7),
            max_tokens: Some(256),
            stream: Some(false),
            ..Default::default()
        });
    });
}

fn bench_estimated_tokens(c: &mut Criterion) {
    let request = ChatRequest {
        model: "gpt-4o".to_string(),
        messages: vec![Message::user("a reasonably long prompt ".repeat(20))],
        max_tokens: Some(512),
        ..Default::default()
    };
    c.bench_function("chat_request_estimated_tokens", |b| {
        b.iter(|| black_box(&request).estimated_tokens());
    });
}

fn bench_serialization(c: &mut Criterion) {
    let request = ChatRequest {
        model: "gpt-4o".to_string(),
        messages: vec![
            Message::system("You are a helpful assistant."),
            Message::user("Hello, how are you?"),
        ],
        temperature: Some(0.7),
        max_tokens: Some(256),
        stream: Some(false),
        ..Default::default()
    };

    c.bench_function("chat_request_serialization", |b| {
        b.iter(|| serde_json::to_string(black_box(&request)).unwrap());
    });

    let json = serde_json::to_string(&request).unwrap();
    c.bench_function("chat_request_deserialization", |b| {
        b.iter(|| {
            let _: ChatRequest = serde_json::from_str(black_box(&json)).unwrap();
        });
    });
}

fn bench_resolver_ordering(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let metrics = Arc::new(MetricsSink::new());
    let resolver = Resolver::new(metrics);
    let key = sample_key();
    let policy = FallbackPolicy::default_for(vec!["p1".to_string(), "p2".to_string(), "p3".to_string()]);
    let providers = vec![
        sample_provider("p1", 2),
        sample_provider("p2", 0),
        sample_provider("p3", 1),
    ];

    c.bench_function("resolver_resolve_priority", |b| {
        b.iter(|| {
            runtime.block_on(resolver.resolve("gpt-4o", &key, &policy, providers.clone()))
        });
    });
}

fn bench_rate_limiter_admit(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let limiter = RateLimiter::new();
    let key = sample_key();

    c.bench_function("rate_limiter_admit", |b| {
        b.iter(|| runtime.block_on(limiter.admit(black_box(&key), black_box(128))));
    });
}

fn bench_circuit_breaker_admit_record(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let breaker = CircuitBreaker::new("bench-provider", CircuitBreakerConfig::default());

    c.bench_function("circuit_breaker_admit_record", |b| {
        b.iter(|| {
            runtime.block_on(async {
                if breaker.admit().await {
                    breaker.record(true).await;
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_request_creation,
    bench_estimated_tokens,
    bench_serialization,
    bench_resolver_ordering,
    bench_rate_limiter_admit,
    bench_circuit_breaker_admit_record
);
criterion_main!(benches);
