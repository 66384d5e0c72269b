// src/error/mod.rs
//! Error taxonomy for the gateway.
//!
//! Every failure the coordinator can observe is a `GatewayError` variant.
//! `CacheError` is internal to the cache component: it is logged there and
//! surfaces to callers only as a cache miss.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// No connection became available within the acquire timeout.
    #[error("Connection pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    /// The backend was unreachable while growing the pool.
    #[error("Failed to open backend connection: {0}")]
    ConnectionCreationFailed(String),

    /// Send/receive error on an acquired connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The circuit breaker is rejecting new attempts.
    #[error("Circuit breaker is open, request rejected")]
    CircuitOpen,

    /// The request exceeded its deadline.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Cache-internal fault. Never escapes the cache component.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// The backend answered with a non-success status.
    #[error("Backend returned status {status}: {message}")]
    UpstreamError { status: u16, message: String },

    /// Configuration errors
    #[error("Config error: {0}")]
    ConfigError(String),
}

impl GatewayError {
    /// Whether a fallback-eligible request may recover from this error by
    /// synthesizing a degraded response instead of propagating it.
    pub fn is_recoverable(&self) -> bool {
        match self {
            GatewayError::PoolExhausted { .. }
            | GatewayError::ConnectionCreationFailed(_)
            | GatewayError::ConnectionFailed(_)
            | GatewayError::CircuitOpen
            | GatewayError::Timeout(_)
            | GatewayError::UpstreamError { .. } => true,
            GatewayError::CacheError(_) => true,
            GatewayError::ConfigError(_) => false,
        }
    }
}
