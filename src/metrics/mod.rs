// src/metrics/mod.rs
//! Gateway observability counters and the serializable snapshot assembled
//! for status reporting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;

/// Smoothing factor for the gateway-wide response-time average.
const AVG_ALPHA: f64 = 0.2;

pub struct GatewayMetrics {
    launch_instant: Instant,
    launched_at: DateTime<Utc>,
    total_requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    fallbacks: AtomicU64,
    model_switches: AtomicU64,
    avg_response_ms: RwLock<f64>,
    last_model: RwLock<Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub launched_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub fallbacks: u64,
    pub model_switches: u64,
    pub avg_response_ms: f64,
    pub requests_per_sec: f64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            launch_instant: Instant::now(),
            launched_at: Utc::now(),
            total_requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            model_switches: AtomicU64::new(0),
            avg_response_ms: RwLock::new(0.0),
            last_model: RwLock::new(None),
        }
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_success(&self, response_ms: u64) {
        let n = self.successes.fetch_add(1, Ordering::Relaxed);
        let mut avg = self.avg_response_ms.write().await;
        *avg = if n == 0 {
            response_ms as f64
        } else {
            *avg * (1.0 - AVG_ALPHA) + response_ms as f64 * AVG_ALPHA
        };
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a model switch whenever the chosen model differs from the one
    /// used by the previous successful request.
    pub async fn record_model(&self, model: &str) {
        let mut last = self.last_model.write().await;
        if last.as_deref() != Some(model) {
            if last.is_some() {
                self.model_switches.fetch_add(1, Ordering::Relaxed);
            }
            *last = Some(model.to_string());
        }
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let uptime = self.launch_instant.elapsed();
        let total = self.total_requests.load(Ordering::Relaxed);
        let requests_per_sec = if uptime.as_secs_f64() > 0.0 {
            total as f64 / uptime.as_secs_f64()
        } else {
            0.0
        };
        MetricsSnapshot {
            launched_at: self.launched_at,
            uptime_secs: uptime.as_secs(),
            total_requests: total,
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            model_switches: self.model_switches.load(Ordering::Relaxed),
            avg_response_ms: *self.avg_response_ms.read().await,
            requests_per_sec,
        }
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[tokio::test]
    async fn counters_accumulate() {
        let metrics = GatewayMetrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_success(100).await;
        metrics.record_failure();
        metrics.record_fallback();

        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.fallbacks, 1);
        assert_approx_eq!(snapshot.avg_response_ms, 100.0);
    }

    #[tokio::test]
    async fn model_switches_count_changes_only() {
        let metrics = GatewayMetrics::new();
        metrics.record_model("a").await;
        metrics.record_model("a").await;
        metrics.record_model("b").await;
        metrics.record_model("a").await;

        assert_eq!(metrics.snapshot().await.model_switches, 2);
    }

    #[tokio::test]
    async fn average_uses_exponential_smoothing() {
        let metrics = GatewayMetrics::new();
        metrics.record_success(100).await;
        metrics.record_success(200).await;

        let snapshot = metrics.snapshot().await;
        assert_approx_eq!(snapshot.avg_response_ms, 120.0);
    }
}
