// src/pool/manager.rs
//! Bounded, health-aware connection pool.
//!
//! Connections live in exactly one of two disjoint sets: `available` (idle)
//! or `busy` (checked out, at most one in-flight request each). Both sets
//! and all per-connection metrics are mutated only inside `acquire` /
//! `release` / the probe cycle, under a single mutex. Waiters are woken by
//! releases through a `Notify`.

use crate::backend::{Transport, TransportFactory};
use crate::error::GatewayError;
use crate::gateway::types::RequestPriority;
use crate::pool::connection::{Connection, ConnectionState, ConnectionSummary};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Idle connections untouched for this long are probed by the health loop.
const PROBE_IDLE_AFTER: Duration = Duration::from_secs(60);
/// Consecutive probe failures before a connection is permanently evicted.
const EVICT_AFTER_FAILURES: u32 = 5;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: usize,
    pub max_connections: usize,
    pub acquire_timeout: Duration,
    pub health_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 3,
            max_connections: 15,
            acquire_timeout: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

/// An acquired connection. The holder must hand it back through
/// `ConnectionPool::release` with the request outcome.
pub struct PooledConnection {
    pub id: Uuid,
    pub transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

struct PoolInner {
    available: HashMap<Uuid, Connection>,
    busy: HashMap<Uuid, Connection>,
    /// Slots reserved for connections being created or probed, counted
    /// toward the capacity bound.
    reserved: usize,
}

impl PoolInner {
    fn occupancy(&self) -> usize {
        self.available.len() + self.busy.len() + self.reserved
    }
}

pub struct ConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn TransportFactory>,
    inner: Mutex<PoolInner>,
    released: Notify,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub available: usize,
    pub busy: usize,
    pub max_connections: usize,
    pub connections: Vec<ConnectionSummary>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            config,
            factory,
            inner: Mutex::new(PoolInner {
                available: HashMap::new(),
                busy: HashMap::new(),
                reserved: 0,
            }),
            released: Notify::new(),
        }
    }

    /// Pre-warms the pool up to `min_connections`. Creation failures are
    /// logged and tolerated; the pool grows lazily on demand afterwards.
    pub async fn initialize(&self) {
        for _ in 0..self.config.min_connections {
            match self.factory.connect().await {
                Ok(transport) => {
                    let conn = Connection::new(transport);
                    debug!("Pre-warmed pool connection {}", conn.id());
                    self.inner.lock().await.available.insert(conn.id(), conn);
                }
                Err(e) => {
                    warn!("Pool pre-warm connection failed: {}", e);
                }
            }
        }
        let inner = self.inner.lock().await;
        info!(
            "Connection pool initialized with {}/{} connections",
            inner.available.len(),
            self.config.min_connections
        );
    }

    /// Returns the best healthy idle connection, growing the pool when below
    /// capacity. At capacity, waits up to the acquire timeout for a release
    /// and retries the selection once before failing with `PoolExhausted`.
    pub async fn acquire(&self, priority: RequestPriority) -> Result<PooledConnection, GatewayError> {
        let started = Instant::now();
        debug!("Acquiring connection (priority {:?})", priority);

        for attempt in 0..2u8 {
            if let Some(handle) = self.try_acquire().await? {
                return Ok(handle);
            }
            if attempt == 0 {
                let _ = tokio::time::timeout(self.config.acquire_timeout, self.released.notified())
                    .await;
            }
        }

        warn!(
            "Connection pool exhausted after {}ms",
            started.elapsed().as_millis()
        );
        Err(GatewayError::PoolExhausted {
            waited_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// One non-blocking acquisition pass: pick the highest-scoring idle
    /// selectable connection, otherwise grow if below capacity.
    async fn try_acquire(&self) -> Result<Option<PooledConnection>, GatewayError> {
        let grow = {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            let best = inner
                .available
                .values()
                .filter(|c| c.is_selectable())
                .max_by(|a, b| {
                    a.selection_score(now)
                        .partial_cmp(&b.selection_score(now))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|c| c.id());

            if let Some(conn) = best.and_then(|id| inner.available.remove(&id)) {
                let handle = PooledConnection {
                    id: conn.id(),
                    transport: conn.transport(),
                };
                inner.busy.insert(conn.id(), conn);
                return Ok(Some(handle));
            }

            if inner.occupancy() < self.config.max_connections {
                inner.reserved += 1;
                true
            } else {
                false
            }
        };

        if !grow {
            return Ok(None);
        }

        // Creation probes the backend, so it happens outside the lock.
        match self.factory.connect().await {
            Ok(transport) => {
                let conn = Connection::new(transport.clone());
                let id = conn.id();
                let mut inner = self.inner.lock().await;
                inner.reserved -= 1;
                inner.busy.insert(id, conn);
                debug!("Pool grew to {} connections", inner.occupancy());
                Ok(Some(PooledConnection { id, transport }))
            }
            Err(e) => {
                self.inner.lock().await.reserved -= 1;
                Err(e)
            }
        }
    }

    /// Returns a connection to the idle set and folds the request outcome
    /// into its metrics and health state.
    pub async fn release(&self, id: Uuid, success: bool, response_ms: u64) {
        let mut inner = self.inner.lock().await;
        match inner.busy.remove(&id) {
            Some(mut conn) => {
                conn.record_result(success, response_ms);
                if conn.state() == ConnectionState::Failed {
                    warn!("Connection {} returned to pool in failed state", id);
                }
                inner.available.insert(id, conn);
            }
            None => {
                warn!("Release for unknown connection {}", id);
            }
        }
        drop(inner);
        self.released.notify_one();
    }

    /// Spawns the background health loop: probes idle connections that have
    /// not been used recently (or sit in the Failed state) and evicts those
    /// that keep failing.
    pub fn spawn_health_loop(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.config.health_check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => pool.probe_idle_connections().await,
                    _ = shutdown.changed() => {
                        debug!("Health loop stopping");
                        break;
                    }
                }
            }
        })
    }

    /// One probe cycle. Connections under probe are temporarily removed from
    /// `available` (slot kept reserved) so they cannot be acquired mid-probe.
    pub async fn probe_idle_connections(&self) {
        let now = Instant::now();
        let candidates: Vec<Uuid> = {
            let inner = self.inner.lock().await;
            inner
                .available
                .values()
                .filter(|c| {
                    matches!(
                        c.state(),
                        ConnectionState::Failed | ConnectionState::Recovering
                    ) || c.idle_for(now) >= PROBE_IDLE_AFTER
                })
                .map(|c| c.id())
                .collect()
        };

        for id in candidates {
            let mut conn = {
                let mut inner = self.inner.lock().await;
                match inner.available.remove(&id) {
                    Some(conn) => {
                        inner.reserved += 1;
                        conn
                    }
                    // Acquired in the meantime; skip.
                    None => continue,
                }
            };

            let healthy = conn.transport().probe().await.is_ok();
            conn.record_probe(healthy);

            let mut inner = self.inner.lock().await;
            inner.reserved -= 1;
            if !healthy && conn.metrics().consecutive_failures >= EVICT_AFTER_FAILURES {
                info!(
                    "Evicting connection {} after {} consecutive probe failures",
                    id,
                    conn.metrics().consecutive_failures
                );
                drop(inner);
                // Capacity freed; a waiter may now grow the pool.
                self.released.notify_one();
            } else {
                debug!(
                    "Probe of connection {}: healthy={} state={:?}",
                    id,
                    healthy,
                    conn.state()
                );
                inner.available.insert(id, conn);
            }
        }
    }

    pub async fn status(&self) -> PoolStatus {
        let inner = self.inner.lock().await;
        let connections = inner
            .available
            .values()
            .chain(inner.busy.values())
            .map(ConnectionSummary::from)
            .collect();
        PoolStatus {
            available: inner.available.len(),
            busy: inner.busy.len(),
            max_connections: self.config.max_connections,
            connections,
        }
    }

    /// Waits up to `grace` for in-flight requests to drain, then closes all
    /// pooled connections.
    pub async fn shutdown(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        loop {
            {
                let inner = self.inner.lock().await;
                if inner.busy.is_empty() {
                    break;
                }
            }
            if Instant::now() >= deadline {
                warn!("Pool shutdown grace period elapsed with requests in flight");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut inner = self.inner.lock().await;
        let closed = inner.available.len() + inner.busy.len();
        inner.available.clear();
        inner.busy.clear();
        info!("Connection pool shut down, {} connections closed", closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use pretty_assertions::assert_eq;

    fn pool_with(backend: &Arc<MockBackend>, min: usize, max: usize) -> Arc<ConnectionPool> {
        Arc::new(ConnectionPool::new(
            PoolConfig {
                min_connections: min,
                max_connections: max,
                acquire_timeout: Duration::from_millis(50),
                health_check_interval: Duration::from_secs(30),
            },
            backend.factory(),
        ))
    }

    #[tokio::test]
    async fn acquire_grows_pool_lazily() {
        let backend = MockBackend::shared();
        let pool = pool_with(&backend, 0, 5);

        let conn = pool.acquire(RequestPriority::Medium).await.unwrap();
        assert_eq!(backend.connects(), 1);

        let status = pool.status().await;
        assert_eq!(status.busy, 1);
        assert_eq!(status.available, 0);

        pool.release(conn.id, true, 42).await;
        let status = pool.status().await;
        assert_eq!(status.busy, 0);
        assert_eq!(status.available, 1);
    }

    #[tokio::test]
    async fn acquire_reuses_idle_connection() {
        let backend = MockBackend::shared();
        let pool = pool_with(&backend, 0, 5);

        let first = pool.acquire(RequestPriority::Medium).await.unwrap();
        pool.release(first.id, true, 10).await;

        let second = pool.acquire(RequestPriority::Medium).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(backend.connects(), 1);
    }

    #[tokio::test]
    async fn capacity_invariant_holds_under_churn() {
        let backend = MockBackend::shared();
        let pool = pool_with(&backend, 0, 3);

        let a = pool.acquire(RequestPriority::High).await.unwrap();
        let b = pool.acquire(RequestPriority::Medium).await.unwrap();
        let c = pool.acquire(RequestPriority::Low).await.unwrap();

        let status = pool.status().await;
        assert_eq!(status.available + status.busy, 3);

        pool.release(a.id, true, 5).await;
        pool.release(b.id, false, 5).await;
        pool.release(c.id, true, 5).await;

        let status = pool.status().await;
        assert!(status.available + status.busy <= 3);
    }

    #[tokio::test]
    async fn exhausted_pool_times_out_with_typed_error() {
        let backend = MockBackend::shared();
        let pool = pool_with(&backend, 0, 1);

        let _held = pool.acquire(RequestPriority::Medium).await.unwrap();
        let err = pool.acquire(RequestPriority::Medium).await.unwrap_err();
        assert!(matches!(err, GatewayError::PoolExhausted { .. }));
    }

    #[tokio::test]
    async fn waiter_wakes_when_connection_released() {
        let backend = MockBackend::shared();
        let pool = pool_with(&backend, 0, 1);

        let held = pool.acquire(RequestPriority::Medium).await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(RequestPriority::Medium).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.release(held.id, true, 5).await;

        let acquired = waiter.await.unwrap();
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn creation_failure_surfaces_during_growth() {
        let backend = MockBackend::shared();
        backend.set_probe_ok(false);
        let pool = pool_with(&backend, 0, 2);

        let err = pool.acquire(RequestPriority::Medium).await.unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionCreationFailed(_)));

        // The reserved slot was rolled back.
        let status = pool.status().await;
        assert_eq!(status.available + status.busy, 0);
    }

    #[tokio::test]
    async fn failed_connection_is_bypassed_by_growth() {
        let backend = MockBackend::shared();
        let pool = pool_with(&backend, 0, 5);

        // Drive the lone connection to Failed with three bad requests.
        for _ in 0..3 {
            let conn = pool.acquire(RequestPriority::Medium).await.unwrap();
            pool.release(conn.id, false, 100).await;
        }
        let status = pool.status().await;
        assert_eq!(status.connections.len(), 1);
        assert_eq!(status.connections[0].state, ConnectionState::Failed);

        // The failed member is unselectable, so the next acquire grows.
        let conn = pool.acquire(RequestPriority::Medium).await.unwrap();
        assert_eq!(backend.connects(), 2);
        pool.release(conn.id, true, 10).await;
    }

    #[tokio::test]
    async fn probe_cycle_evicts_repeatedly_failing_connection() {
        let backend = MockBackend::shared();
        let pool = pool_with(&backend, 1, 5);
        pool.initialize().await;

        // Make the connection look failed and long idle, then break probes.
        for _ in 0..3 {
            let conn = pool.acquire(RequestPriority::Medium).await.unwrap();
            pool.release(conn.id, false, 100).await;
        }
        backend.set_probe_ok(false);

        // Two more probe failures reach the eviction threshold of five.
        pool.probe_idle_connections().await;
        pool.probe_idle_connections().await;

        let status = pool.status().await;
        assert_eq!(status.available + status.busy, 0);
    }

    #[tokio::test]
    async fn probe_cycle_recovers_failed_connection() {
        let backend = MockBackend::shared();
        let pool = pool_with(&backend, 1, 5);
        pool.initialize().await;

        for _ in 0..3 {
            let conn = pool.acquire(RequestPriority::Medium).await.unwrap();
            pool.release(conn.id, false, 100).await;
        }

        // Probes succeed: Failed -> Recovering -> Healthy.
        pool.probe_idle_connections().await;
        pool.probe_idle_connections().await;

        let status = pool.status().await;
        assert_eq!(status.connections[0].state, ConnectionState::Healthy);
    }
}
