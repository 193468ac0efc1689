//! CircuitBreaker (C5): one instance per provider.
//!
//! Three states — closed, open, half-open — exactly as spec.md §4.5 describes them. Closed
//! tracks a sliding window of the last `failure_threshold * 2` outcomes (default 10) and
//! opens the instant `consecutive_failures` reaches `failure_threshold` (the threshold-th
//! failure, not the one after). Open blocks every call until `reset_timeout` has elapsed
//! since it opened, then allows exactly one probe through in half-open. A success in
//! half-open closes the breaker and clears the counter; a failure reopens it.
//!
//! Generalizes the teacher's `CircuitBreaker<State>` (`Arc<RwLock<...>>` plus a generic
//! `call` wrapper around `tokio::time::timeout`) to these exact thresholds and adds the admin
//! surface spec.md calls for: `reset`, `force_open`, `status`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "crate::common::duration_serde")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(5 * 60),
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

pub struct CircuitBreaker {
    provider_id: String,
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
    half_open_probe_in_flight: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(provider_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let window_len = (config.failure_threshold as usize * 2).max(1);
        Self {
            provider_id: provider_id.into(),
            config,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                window: VecDeque::with_capacity(window_len),
                opened_at: None,
            }),
            half_open_probe_in_flight: AtomicBool::new(false),
        }
    }

    /// Whether a dispatch attempt may proceed right now. Transitions open→half-open when
    /// `reset_timeout` has elapsed, and reserves the single half-open probe slot.
    pub async fn admit(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    drop(inner);
                    // Only one caller wins the race to become the probe.
                    !self.half_open_probe_in_flight.swap(true, Ordering::SeqCst)
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => false,
        }
    }

    /// Record the outcome of a dispatch attempt that `admit()` allowed through.
    pub async fn record(&self, success: bool) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::HalfOpen => {
                self.half_open_probe_in_flight.store(false, Ordering::SeqCst);
                if success {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.window.clear();
                } else {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            _ => {
                let window_len = (self.config.failure_threshold as usize * 2).max(1);
                inner.window.push_back(success);
                while inner.window.len() > window_len {
                    inner.window.pop_front();
                }
                if success {
                    inner.consecutive_failures = 0;
                } else {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Instant::now());
                    }
                }
            }
        }
    }

    pub async fn status(&self) -> CircuitBreakerStatus {
        let inner = self.inner.read().await;
        CircuitBreakerStatus {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
        }
    }

    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.window.clear();
        inner.opened_at = None;
        self.half_open_probe_in_flight.store(false, Ordering::SeqCst);
    }

    /// Force-open for maintenance, bypassing the normal failure threshold.
    pub async fn force_open(&self) {
        let mut inner = self.inner.write().await;
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "p1",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: Duration::from_millis(20),
            },
        )
    }

    #[tokio::test]
    async fn opens_on_the_threshold_th_failure_exactly() {
        let cb = breaker(3);
        for _ in 0..2 {
            assert!(cb.admit().await);
            cb.record(false).await;
            assert_eq!(cb.status().await.state, CircuitState::Closed);
        }
        assert!(cb.admit().await);
        cb.record(false).await;
        assert_eq!(cb.status().await.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn open_blocks_all_calls() {
        let cb = breaker(1);
        cb.record(false).await;
        assert_eq!(cb.status().await.state, CircuitState::Open);
        assert!(!cb.admit().await);
    }

    #[tokio::test]
    async fn half_open_after_reset_timeout_admits_exactly_one_probe() {
        let cb = breaker(1);
        cb.record(false).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cb.admit().await);
        // A second concurrent admit before the probe resolves must be rejected.
        assert!(!cb.admit().await);
    }

    #[tokio::test]
    async fn half_open_success_closes_and_clears_counter() {
        let cb = breaker(1);
        cb.record(false).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cb.admit().await);
        cb.record(true).await;
        let status = cb.status().await;
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = breaker(1);
        cb.record(false).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cb.admit().await);
        cb.record(false).await;
        assert_eq!(cb.status().await.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn manual_reset_returns_to_closed() {
        let cb = breaker(1);
        cb.record(false).await;
        cb.reset().await;
        assert_eq!(cb.status().await.state, CircuitState::Closed);
        assert!(cb.admit().await);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failure_counter() {
        let cb = breaker(3);
        cb.record(false).await;
        cb.record(true).await;
        assert_eq!(cb.status().await.consecutive_failures, 0);
    }
}
