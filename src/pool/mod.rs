// src/pool/mod.rs
//! Connection pooling and fault tolerance:
//! - Bounded, health-aware connection pool with lazy growth
//! - Per-connection health state machine and background probing
//! - Gateway-wide circuit breaker

pub mod circuit;
pub mod connection;
pub mod manager;

pub use circuit::{BreakerState, CircuitBreaker};
pub use connection::{Connection, ConnectionMetrics, ConnectionState, ConnectionSummary};
pub use manager::{ConnectionPool, PoolConfig, PoolStatus, PooledConnection};
