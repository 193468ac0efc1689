//! MetricsSink (C11): in-memory counters and EWMA-windowed success rates.
//!
//! Narrowed from the teacher's `MetricsCollector` (`metrics.rs`) to what the dispatch engine
//! actually needs: per-(provider, model, outcome) counters, latency/token histograms, and
//! 1m/5m/1h EWMA success-rate windows the `health_based` Resolver strategy reads. No cost/USD
//! tracking — that's an explicit Non-goal. Replaces the teacher's `OnceLock<Arc<RwLock<...>>>`
//! singleton with a plain `Engine`-owned value.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

struct ProviderStats {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_latency_ms: AtomicU64,
    total_tokens: AtomicU64,
    /// EWMA of success (1.0) / failure (0.0), alpha=0.1, matching the teacher's routing EWMA
    /// constant. Used directly as the 1-minute success-rate signal for the health_based
    /// Resolver strategy per spec §9's fixed-window resolution.
    ewma_1m: AtomicU64, // f64 bits
    ewma_5m: AtomicU64,
    ewma_1h: AtomicU64,
}

impl Default for ProviderStats {
    fn default() -> Self {
        Self {
            requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            total_tokens: AtomicU64::new(0),
            ewma_1m: AtomicU64::new(1.0f64.to_bits()),
            ewma_5m: AtomicU64::new(1.0f64.to_bits()),
            ewma_1h: AtomicU64::new(1.0f64.to_bits()),
        }
    }
}

fn ewma_update(cell: &AtomicU64, alpha: f64, sample: f64) {
    let prev = f64::from_bits(cell.load(Ordering::Relaxed));
    let next = alpha * sample + (1.0 - alpha) * prev;
    cell.store(next.to_bits(), Ordering::Relaxed);
}

pub struct MetricsSink {
    by_provider: DashMap<String, ProviderStats>,
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink {
    pub fn new() -> Self {
        Self {
            by_provider: DashMap::new(),
        }
    }

    pub fn record(&self, provider_id: &str, _model: &str, outcome: Outcome, latency_ms: u64, tokens: u64) {
        let stats = self
            .by_provider
            .entry(provider_id.to_string())
            .or_default();
        stats.requests.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Outcome::Success => {
                stats.successes.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Failure => {
                stats.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        stats.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        stats.total_tokens.fetch_add(tokens, Ordering::Relaxed);

        let sample = if outcome == Outcome::Success { 1.0 } else { 0.0 };
        ewma_update(&stats.ewma_1m, 0.1, sample);
        ewma_update(&stats.ewma_5m, 0.02, sample);
        ewma_update(&stats.ewma_1h, 0.002, sample);
    }

    pub fn success_rate_1m(&self, provider_id: &str) -> f64 {
        self.by_provider
            .get(provider_id)
            .map(|s| f64::from_bits(s.ewma_1m.load(Ordering::Relaxed)))
            .unwrap_or(0.0)
    }

    pub fn snapshot(&self, provider_id: &str) -> Option<ProviderSnapshot> {
        self.by_provider.get(provider_id).map(|s| ProviderSnapshot {
            provider_id: provider_id.to_string(),
            requests: s.requests.load(Ordering::Relaxed),
            successes: s.successes.load(Ordering::Relaxed),
            failures: s.failures.load(Ordering::Relaxed),
            avg_latency_ms: {
                let n = s.requests.load(Ordering::Relaxed).max(1);
                s.total_latency_ms.load(Ordering::Relaxed) / n
            },
            total_tokens: s.total_tokens.load(Ordering::Relaxed),
            success_rate_1m: f64::from_bits(s.ewma_1m.load(Ordering::Relaxed)),
            success_rate_5m: f64::from_bits(s.ewma_5m.load(Ordering::Relaxed)),
            success_rate_1h: f64::from_bits(s.ewma_1h.load(Ordering::Relaxed)),
        })
    }

    pub fn all_snapshots(&self) -> Vec<ProviderSnapshot> {
        self.by_provider
            .iter()
            .filter_map(|e| self.snapshot(e.key()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderSnapshot {
    pub provider_id: String,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_latency_ms: u64,
    pub total_tokens: u64,
    pub success_rate_1m: f64,
    pub success_rate_5m: f64,
    pub success_rate_1h: f64,
}
