// src/gateway/mod.rs
//! Gateway facade: wires the pool, circuit breaker, cache, coordinator, and
//! optional batch scheduler together and owns their lifecycles.

pub mod batch;
pub mod classifier;
pub mod coordinator;
pub mod types;

pub use batch::{BatchConfig, BatchScheduler};
pub use classifier::{
    ContextClassifier, HeuristicQualityEstimator, ResponseQualityEstimator, ThresholdClassifier,
};
pub use coordinator::RequestCoordinator;
pub use types::{
    ContextTier, GenerationParams, GenerationRequest, GenerationResponse, RequestPriority,
    TierInfluence,
};

use crate::backend::{HttpTransportFactory, TransportFactory};
use crate::cache::{CacheConfig, CacheStats, ResponseCache};
use crate::config::Config;
use crate::error::GatewayError;
use crate::metrics::{GatewayMetrics, MetricsSnapshot};
use crate::pool::{BreakerState, CircuitBreaker, ConnectionPool, PoolConfig, PoolStatus};
use log::info;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

/// Aggregate snapshot of everything the gateway exposes for observability.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub breaker_state: BreakerState,
    pub breaker_failure_count: u32,
    pub pool: PoolStatus,
    pub cache: CacheStats,
    pub metrics: MetricsSnapshot,
}

pub struct Gateway {
    pool: Arc<ConnectionPool>,
    breaker: Arc<RwLock<CircuitBreaker>>,
    cache: Arc<ResponseCache>,
    metrics: Arc<GatewayMetrics>,
    coordinator: Arc<RequestCoordinator>,
    batcher: Option<BatchScheduler>,
    health_handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl Gateway {
    /// Builds a gateway talking HTTP to the configured backend.
    pub async fn connect(config: Arc<Config>) -> Result<Self, GatewayError> {
        let factory = Arc::new(HttpTransportFactory::new(
            config.base_url.clone(),
            Duration::from_millis(config.connection_timeout_ms),
            config.request_timeout(),
        ));
        Self::with_factory(config, factory).await
    }

    /// Builds a gateway over an arbitrary transport factory. This is the
    /// seam the integration tests use to substitute a scripted backend.
    pub async fn with_factory(
        config: Arc<Config>,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self, GatewayError> {
        config.validate()?;

        let pool = Arc::new(ConnectionPool::new(
            PoolConfig {
                min_connections: config.min_connections,
                max_connections: config.max_connections,
                acquire_timeout: config.acquire_timeout(),
                health_check_interval: Duration::from_secs(config.health_check_interval_secs),
            },
            factory,
        ));
        pool.initialize().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let health_handle = pool.spawn_health_loop(shutdown_rx);

        let breaker = Arc::new(RwLock::new(CircuitBreaker::new(
            config.failure_threshold,
            config.recovery_timeout(),
            config.half_open_max_calls,
        )));
        let cache = Arc::new(ResponseCache::new(CacheConfig {
            enabled: config.enable_caching,
            ttl: config.cache_ttl(),
            max_size: config.max_cache_size,
        }));
        let metrics = Arc::new(GatewayMetrics::new());

        let classifier: Arc<dyn ContextClassifier> =
            Arc::new(ThresholdClassifier::new(config.tier_thresholds));
        let quality: Arc<dyn ResponseQualityEstimator> =
            Arc::new(HeuristicQualityEstimator::default());

        let coordinator = Arc::new(RequestCoordinator::new(
            Arc::clone(&config),
            Arc::clone(&pool),
            Arc::clone(&breaker),
            Arc::clone(&cache),
            classifier,
            quality,
            Arc::clone(&metrics),
        ));

        let batcher = if config.enable_batching {
            Some(BatchScheduler::spawn(
                Arc::clone(&coordinator),
                BatchConfig {
                    batch_size: config.batch_size,
                    batch_timeout: config.batch_timeout(),
                },
            ))
        } else {
            None
        };

        info!(
            "Gateway ready (batching={}, caching={})",
            config.enable_batching, config.enable_caching
        );

        Ok(Self {
            pool,
            breaker,
            cache,
            metrics,
            coordinator,
            batcher,
            health_handle,
            shutdown_tx,
        })
    }

    /// Public entry point for one generation request.
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GatewayError> {
        match &self.batcher {
            Some(batcher) => batcher.submit(request).await,
            None => self.coordinator.process(request).await,
        }
    }

    pub async fn status(&self) -> GatewayStatus {
        let breaker = self.breaker.read().await;
        GatewayStatus {
            breaker_state: breaker.state(),
            breaker_failure_count: breaker.failure_count(),
            pool: self.pool.status().await,
            cache: self.cache.stats(),
            metrics: self.metrics.snapshot().await,
        }
    }

    /// Stops the batch and health loops, lets in-flight requests finish
    /// within `grace`, then closes all pooled connections.
    pub async fn shutdown(self, grace: Duration) {
        if let Some(batcher) = self.batcher {
            batcher.shutdown().await;
        }
        let _ = self.shutdown_tx.send(true);
        let _ = self.health_handle.await;
        self.pool.shutdown(grace).await;
        info!("Gateway shut down");
    }
}
