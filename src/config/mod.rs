// src/config/mod.rs
pub mod settings;

pub use settings::{Config, TierProfile, TierThresholds};

use crate::error::GatewayError;
use std::sync::Arc;

/// Loads the gateway configuration from the environment (and `.env` when
/// present), validates it, and returns it shared.
pub fn load_config() -> Result<Arc<Config>, GatewayError> {
    dotenv::dotenv().ok();

    let config = Config::from_env();
    config.validate()?;
    config.validate_and_log();

    Ok(Arc::new(config))
}
