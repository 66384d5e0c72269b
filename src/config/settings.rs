// src/config/settings.rs
//! Env-driven gateway configuration with sensible defaults.

use crate::gateway::types::{ContextTier, GenerationParams};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Candidate models plus default generation parameters for one tier.
#[derive(Debug, Clone)]
pub struct TierProfile {
    pub models: Vec<String>,
    pub params: GenerationParams,
    /// Token budget scale applied on top of per-request overrides.
    pub token_multiplier: f64,
}

/// Tier classification thresholds. Empirical defaults, configuration rather
/// than load-bearing correctness requirements.
#[derive(Debug, Clone, Copy)]
pub struct TierThresholds {
    pub peak: f64,
    pub high: f64,
    pub moderate: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            peak: 0.8,
            high: 0.6,
            moderate: 0.3,
        }
    }
}

static DEFAULT_TIER_PROFILES: Lazy<HashMap<ContextTier, TierProfile>> = Lazy::new(|| {
    let profile = |models: &[&str], temperature: f64, max_tokens: u32, multiplier: f64| TierProfile {
        models: models.iter().map(|m| m.to_string()).collect(),
        params: GenerationParams {
            temperature,
            max_tokens,
            ..GenerationParams::default()
        },
        token_multiplier: multiplier,
    };

    let mut profiles = HashMap::new();
    profiles.insert(
        ContextTier::Peak,
        profile(&["llama-3.1-70b-instruct", "mixtral-8x7b-instruct"], 0.85, 1024, 1.5),
    );
    profiles.insert(
        ContextTier::High,
        profile(&["llama-3.1-8b-instruct", "mistral-7b-instruct"], 0.75, 768, 1.2),
    );
    profiles.insert(
        ContextTier::Moderate,
        profile(&["mistral-7b-instruct"], 0.7, 512, 1.0),
    );
    profiles.insert(
        ContextTier::Low,
        profile(&["phi-3-mini-instruct"], 0.6, 256, 0.8),
    );
    profiles
});

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub min_connections: usize,
    pub max_connections: usize,
    pub connection_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
    pub health_check_interval_secs: u64,
    pub enable_batching: bool,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub enable_caching: bool,
    pub cache_ttl_secs: u64,
    pub max_cache_size: usize,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub half_open_max_calls: u32,
    pub tier_thresholds: TierThresholds,
    pub tier_profiles: HashMap<ContextTier, TierProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_url: "http://127.0.0.1:8080".to_string(),
            min_connections: 3,
            max_connections: 15,
            connection_timeout_ms: 3000,
            request_timeout_ms: 30000,
            acquire_timeout_ms: 5000,
            health_check_interval_secs: 30,
            enable_batching: false,
            batch_size: 5,
            batch_timeout_ms: 500,
            enable_caching: true,
            cache_ttl_secs: 300,
            max_cache_size: 1000,
            failure_threshold: 10,
            recovery_timeout_secs: 60,
            half_open_max_calls: 3,
            tier_thresholds: TierThresholds::default(),
            tier_profiles: DEFAULT_TIER_PROFILES.clone(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            base_url: env::var("INFERENCE_BASE_URL").unwrap_or(defaults.base_url),
            min_connections: env_parse("MIN_CONNECTIONS", defaults.min_connections),
            max_connections: env_parse("MAX_CONNECTIONS", defaults.max_connections),
            connection_timeout_ms: env_parse("CONNECTION_TIMEOUT_MS", defaults.connection_timeout_ms),
            request_timeout_ms: env_parse("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            acquire_timeout_ms: env_parse("ACQUIRE_TIMEOUT_MS", defaults.acquire_timeout_ms),
            health_check_interval_secs: env_parse(
                "HEALTH_CHECK_INTERVAL_SECS",
                defaults.health_check_interval_secs,
            ),
            enable_batching: env_parse("ENABLE_BATCHING", defaults.enable_batching),
            batch_size: env_parse("BATCH_SIZE", defaults.batch_size),
            batch_timeout_ms: env_parse("BATCH_TIMEOUT_MS", defaults.batch_timeout_ms),
            enable_caching: env_parse("ENABLE_CACHING", defaults.enable_caching),
            cache_ttl_secs: env_parse("CACHE_TTL_SECS", defaults.cache_ttl_secs),
            max_cache_size: env_parse("MAX_CACHE_SIZE", defaults.max_cache_size),
            failure_threshold: env_parse("FAILURE_THRESHOLD", defaults.failure_threshold),
            recovery_timeout_secs: env_parse("RECOVERY_TIMEOUT_SECS", defaults.recovery_timeout_secs),
            half_open_max_calls: env_parse("HALF_OPEN_MAX_CALLS", defaults.half_open_max_calls),
            tier_thresholds: defaults.tier_thresholds,
            tier_profiles: defaults.tier_profiles,
        }
    }

    pub fn tier_profile(&self, tier: ContextTier) -> Option<&TierProfile> {
        self.tier_profiles.get(&tier)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), crate::error::GatewayError> {
        use crate::error::GatewayError;

        url::Url::parse(&self.base_url)
            .map_err(|e| GatewayError::ConfigError(format!("INFERENCE_BASE_URL invalid: {}", e)))?;
        if self.max_connections == 0 {
            return Err(GatewayError::ConfigError(
                "MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(GatewayError::ConfigError(format!(
                "MIN_CONNECTIONS ({}) exceeds MAX_CONNECTIONS ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.batch_size == 0 {
            return Err(GatewayError::ConfigError(
                "BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        for tier in [
            ContextTier::Low,
            ContextTier::Moderate,
            ContextTier::High,
            ContextTier::Peak,
        ] {
            match self.tier_profiles.get(&tier) {
                Some(profile) if !profile.models.is_empty() => {}
                _ => {
                    return Err(GatewayError::ConfigError(format!(
                        "tier {:?} has no candidate models configured",
                        tier
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn validate_and_log(&self) {
        log::info!(
            "Gateway configuration loaded: base_url={} pool={}..{} batching={} caching={} breaker_threshold={}",
            self.base_url,
            self.min_connections,
            self.max_connections,
            self.enable_batching,
            self.enable_caching,
            self.failure_threshold
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.min_connections, 3);
        assert_eq!(config.max_connections, 15);
        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.cache_ttl_secs, 300);
        assert_eq!(config.max_cache_size, 1000);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.batch_timeout_ms, 500);
        assert_eq!(config.half_open_max_calls, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn every_tier_has_a_profile() {
        let config = Config::default();
        for tier in [
            ContextTier::Low,
            ContextTier::Moderate,
            ContextTier::High,
            ContextTier::Peak,
        ] {
            let profile = config.tier_profile(tier).expect("profile missing");
            assert!(!profile.models.is_empty());
        }
    }

    #[test]
    fn validate_rejects_inverted_pool_bounds() {
        let config = Config {
            min_connections: 20,
            max_connections: 5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
