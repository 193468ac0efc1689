//! HealthMonitor (C6): a scheduler distinct from CircuitBreaker.
//!
//! Per spec.md §4.6, health probing must not itself affect circuit-breaker state — it's
//! informational only, feeding `Provider.health_status` for the `health_based` Resolver
//! strategy and the admin surface. Grounded on the pack's periodic-health-poll idiom
//! (`tokio::time::interval` + a background `tokio::spawn`, the same shape the teacher uses
//! for its own cleanup tasks in `auth.rs`/`metrics.rs`) rather than on anything in
//! `circuit_breaker.rs`, which conflates health into breaker state.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapters::AdapterRuntime;
use crate::provider::{HealthState, HealthStatus, ProviderRegistry};

pub struct HealthMonitor {
    registry: Arc<dyn ProviderRegistry>,
    interval: Duration,
    cancel: CancellationToken,
}

impl HealthMonitor {
    pub fn new(registry: Arc<dyn ProviderRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the background polling loop. The returned handle resolves once `stop()` is
    /// called and any in-flight probes have been cancelled.
    pub fn spawn<F>(self: Arc<Self>, adapter_for: F) -> JoinHandle<()>
    where
        F: Fn(&str) -> Option<Arc<dyn AdapterRuntime>> + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        debug!("health monitor stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.probe_all(&adapter_for).await;
                    }
                }
            }
        })
    }

    async fn probe_all<F>(&self, adapter_for: &F)
    where
        F: Fn(&str) -> Option<Arc<dyn AdapterRuntime>>,
    {
        for provider in self.registry.list_enabled().await {
            let Some(adapter) = adapter_for(&provider.id) else {
                continue;
            };
            let cancel = self.cancel.clone();
            let status = tokio::select! {
                _ = cancel.cancelled() => return,
                result = adapter.health_probe() => result,
            };
            let status = match status {
                Ok(()) => HealthStatus {
                    state: HealthState::Healthy,
                    last_checked: Some(chrono::Utc::now()),
                    reason: None,
                },
                Err(reason) => {
                    warn!(provider = %provider.id, %reason, "health probe failed");
                    HealthStatus {
                        state: HealthState::Unhealthy,
                        last_checked: Some(chrono::Utc::now()),
                        reason: Some(reason),
                    }
                }
            };
            self.registry.update_health(&provider.id, status).await;
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
