// src/lib.rs
//! Resilient client gateway for a chat-completion-style inference backend.
//!
//! The gateway keeps a bounded pool of live connections, gates attempts
//! through a circuit breaker, caches recent results, optionally batches
//! concurrent requests, and tunes model/parameter selection from a
//! caller-supplied context score.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod pool;
pub mod testing; // Scriptable backend for unit and integration tests
pub mod utils;

pub use cache::{CacheConfig, CacheStats, ResponseCache};
pub use config::{load_config, Config};
pub use error::GatewayError;
pub use gateway::{
    ContextTier, Gateway, GatewayStatus, GenerationRequest, GenerationResponse, RequestPriority,
};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use pool::{BreakerState, CircuitBreaker, ConnectionPool, ConnectionState, PoolConfig};
