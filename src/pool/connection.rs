// src/pool/connection.rs
//! A single pooled backend connection: identity, health state machine, and
//! the smoothed metrics that drive idle-connection selection.

use crate::backend::Transport;
use log::debug;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Smoothing factor for the response-time EWMA.
const RESPONSE_TIME_ALPHA: f64 = 0.3;
/// Smoothing factor for the error-rate EWMA.
const ERROR_RATE_ALPHA: f64 = 0.1;
/// Connections used this recently get a selection bonus (keep-alive locality).
const RECENCY_WINDOW: Duration = Duration::from_secs(60);
const RECENCY_BONUS: f64 = 1.2;
/// Consecutive failures in Degraded before the connection is marked Failed.
const FAILED_AFTER: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Healthy,
    Degraded,
    Failed,
    Recovering,
}

#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    pub requests_processed: u64,
    pub avg_response_ms: f64,
    pub error_rate: f64,
    pub consecutive_failures: u32,
    pub last_used: Instant,
}

pub struct Connection {
    id: Uuid,
    transport: Arc<dyn Transport>,
    state: ConnectionState,
    metrics: ConnectionMetrics,
}

impl Connection {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            id: Uuid::new_v4(),
            transport,
            state: ConnectionState::Healthy,
            metrics: ConnectionMetrics {
                requests_processed: 0,
                avg_response_ms: 0.0,
                error_rate: 0.0,
                consecutive_failures: 0,
                last_used: Instant::now(),
            },
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.metrics
    }

    /// Whether this connection may serve live requests.
    pub fn is_selectable(&self) -> bool {
        self.state != ConnectionState::Failed
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(self.metrics.last_used)
    }

    /// Selection score among idle connections:
    /// `(1 / (avg_response + eps)) * (1 - error_rate) * recency_bonus`.
    pub fn selection_score(&self, now: Instant) -> f64 {
        let recency = if self.idle_for(now) < RECENCY_WINDOW {
            RECENCY_BONUS
        } else {
            1.0
        };
        (1.0 / (self.metrics.avg_response_ms + 1.0)) * (1.0 - self.metrics.error_rate) * recency
    }

    /// Updates metrics and the health state machine after a live request.
    pub fn record_result(&mut self, success: bool, response_ms: u64) {
        self.metrics.requests_processed += 1;
        self.metrics.last_used = Instant::now();

        let sample = response_ms as f64;
        if self.metrics.requests_processed == 1 {
            self.metrics.avg_response_ms = sample;
        } else {
            self.metrics.avg_response_ms = self.metrics.avg_response_ms
                * (1.0 - RESPONSE_TIME_ALPHA)
                + sample * RESPONSE_TIME_ALPHA;
        }
        let failure_sample = if success { 0.0 } else { 1.0 };
        self.metrics.error_rate =
            self.metrics.error_rate * (1.0 - ERROR_RATE_ALPHA) + failure_sample * ERROR_RATE_ALPHA;

        if success {
            self.metrics.consecutive_failures = 0;
            self.state = match self.state {
                ConnectionState::Failed => ConnectionState::Failed,
                _ => ConnectionState::Healthy,
            };
        } else {
            self.metrics.consecutive_failures += 1;
            self.state = match self.state {
                ConnectionState::Healthy => ConnectionState::Degraded,
                ConnectionState::Degraded | ConnectionState::Recovering => {
                    if self.metrics.consecutive_failures >= FAILED_AFTER {
                        debug!(
                            "Connection {} marked failed after {} consecutive failures",
                            self.id, self.metrics.consecutive_failures
                        );
                        ConnectionState::Failed
                    } else {
                        ConnectionState::Degraded
                    }
                }
                ConnectionState::Failed => ConnectionState::Failed,
            };
        }
    }

    /// Updates the state machine after a background health probe. Failed
    /// connections need two consecutive good probes to become Healthy again.
    pub fn record_probe(&mut self, success: bool) {
        if success {
            self.metrics.consecutive_failures = 0;
            self.state = match self.state {
                ConnectionState::Failed => ConnectionState::Recovering,
                ConnectionState::Recovering | ConnectionState::Degraded => ConnectionState::Healthy,
                ConnectionState::Healthy => ConnectionState::Healthy,
            };
        } else {
            self.metrics.consecutive_failures += 1;
            self.state = match self.state {
                ConnectionState::Healthy => ConnectionState::Degraded,
                ConnectionState::Degraded | ConnectionState::Recovering => {
                    if self.metrics.consecutive_failures >= FAILED_AFTER {
                        ConnectionState::Failed
                    } else {
                        ConnectionState::Degraded
                    }
                }
                ConnectionState::Failed => ConnectionState::Failed,
            };
        }
    }
}

/// Summary of one connection for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub id: Uuid,
    pub state: ConnectionState,
    pub requests_processed: u64,
    pub avg_response_ms: f64,
    pub error_rate: f64,
    pub consecutive_failures: u32,
}

impl From<&Connection> for ConnectionSummary {
    fn from(conn: &Connection) -> Self {
        Self {
            id: conn.id,
            state: conn.state,
            requests_processed: conn.metrics.requests_processed,
            avg_response_ms: conn.metrics.avg_response_ms,
            error_rate: conn.metrics.error_rate,
            consecutive_failures: conn.metrics.consecutive_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use assert_approx_eq::assert_approx_eq;

    fn connection() -> Connection {
        Connection::new(MockBackend::shared().transport())
    }

    #[test]
    fn degrades_on_first_failure_and_fails_after_three() {
        let mut conn = connection();
        assert_eq!(conn.state(), ConnectionState::Healthy);

        conn.record_result(false, 100);
        assert_eq!(conn.state(), ConnectionState::Degraded);
        conn.record_result(false, 100);
        assert_eq!(conn.state(), ConnectionState::Degraded);
        conn.record_result(false, 100);
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(!conn.is_selectable());
    }

    #[test]
    fn recovers_through_two_successful_probes() {
        let mut conn = connection();
        for _ in 0..3 {
            conn.record_result(false, 100);
        }
        assert_eq!(conn.state(), ConnectionState::Failed);

        conn.record_probe(true);
        assert_eq!(conn.state(), ConnectionState::Recovering);
        conn.record_probe(true);
        assert_eq!(conn.state(), ConnectionState::Healthy);
        assert!(conn.is_selectable());
    }

    #[test]
    fn success_resets_degraded_connection() {
        let mut conn = connection();
        conn.record_result(false, 100);
        assert_eq!(conn.state(), ConnectionState::Degraded);
        conn.record_result(true, 80);
        assert_eq!(conn.state(), ConnectionState::Healthy);
        assert_eq!(conn.metrics().consecutive_failures, 0);
    }

    #[test]
    fn response_time_uses_exponential_smoothing() {
        let mut conn = connection();
        conn.record_result(true, 100);
        assert_approx_eq!(conn.metrics().avg_response_ms, 100.0);

        conn.record_result(true, 200);
        assert_approx_eq!(conn.metrics().avg_response_ms, 130.0);
    }

    #[test]
    fn recently_used_connection_scores_higher() {
        let mut fresh = connection();
        let mut stale = connection();
        fresh.record_result(true, 100);
        stale.record_result(true, 100);

        let now = Instant::now() + Duration::from_secs(120);
        fresh.metrics.last_used = Instant::now() + Duration::from_secs(90);
        assert!(fresh.selection_score(now) > stale.selection_score(now));
    }

    #[test]
    fn error_prone_connection_scores_lower() {
        let mut clean = connection();
        let mut flaky = connection();
        clean.record_result(true, 100);
        flaky.record_result(true, 100);
        flaky.record_result(false, 100);
        flaky.record_result(true, 100);

        let now = Instant::now();
        assert!(clean.selection_score(now) > flaky.selection_score(now));
    }
}
