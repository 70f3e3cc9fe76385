//! Configuration recognised by the ingestion core. Loading, CLI parsing and `.env` files are
//! an external collaborator's concern - this module only defines the shape and the defaults, and
//! offers a convenience `from_env` constructor in the style this codebase's operators expect.

use crate::error::CoreError;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bc_save_threshold_usd: f64,
    pub amm_save_threshold_usd: f64,
    pub save_all_tokens: bool,

    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,

    pub batch_size: usize,
    pub batch_interval: Duration,

    pub pool_size: u32,
    pub idle_timeout: Duration,
    pub connection_timeout: Duration,

    pub sol_price_update_interval: Duration,

    pub database_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bc_save_threshold_usd: 8_888.0,
            amm_save_threshold_usd: 1_000.0,
            save_all_tokens: false,
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: Duration::from_secs(60),
            batch_size: 50,
            batch_interval: Duration::from_millis(250),
            pool_size: 10,
            idle_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(5),
            sol_price_update_interval: Duration::from_secs(5),
            database_url: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the documented defaults
    /// for anything unset. `DATABASE_URL` is the only required variable.
    pub fn from_env() -> Result<Self, CoreError> {
        let mut cfg = Self::default();

        cfg.database_url = std::env::var("DATABASE_URL")
            .map_err(|_| CoreError::ConfigInvalid("DATABASE_URL is required".into()))?;

        if let Some(v) = parse_env_f64("BC_SAVE_THRESHOLD_USD")? {
            cfg.bc_save_threshold_usd = v;
        }
        if let Some(v) = parse_env_f64("AMM_SAVE_THRESHOLD_USD")? {
            cfg.amm_save_threshold_usd = v;
        }
        if let Some(v) = parse_env_bool("SAVE_ALL_TOKENS")? {
            cfg.save_all_tokens = v;
        }
        if let Some(v) = parse_env_millis("RECONNECT_DELAY_MS")? {
            cfg.reconnect_delay = v;
        }
        if let Some(v) = parse_env_millis("MAX_RECONNECT_DELAY_MS")? {
            cfg.max_reconnect_delay = v;
        }
        if let Some(v) = parse_env_usize("BATCH_SIZE")? {
            cfg.batch_size = v;
        }
        if let Some(v) = parse_env_millis("BATCH_INTERVAL_MS")? {
            cfg.batch_interval = v;
        }
        if let Some(v) = parse_env_u32("POOL_SIZE")? {
            cfg.pool_size = v;
        }
        if let Some(v) = parse_env_millis("IDLE_TIMEOUT_MS")? {
            cfg.idle_timeout = v;
        }
        if let Some(v) = parse_env_millis("CONNECTION_TIMEOUT_MS")? {
            cfg.connection_timeout = v;
        }
        if let Some(v) = parse_env_millis("SOL_PRICE_UPDATE_INTERVAL_MS")? {
            cfg.sol_price_update_interval = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.batch_size == 0 {
            return Err(CoreError::ConfigInvalid("BATCH_SIZE must be > 0".into()));
        }
        if self.max_reconnect_delay < self.reconnect_delay {
            return Err(CoreError::ConfigInvalid(
                "MAX_RECONNECT_DELAY_MS must be >= RECONNECT_DELAY_MS".into(),
            ));
        }
        if self.database_url.is_empty() {
            return Err(CoreError::ConfigInvalid("DATABASE_URL is required".into()));
        }
        Ok(())
    }
}

fn parse_env_f64(key: &str) -> Result<Option<f64>, CoreError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|_| CoreError::ConfigInvalid(format!("{key} must be a number, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}

fn parse_env_usize(key: &str) -> Result<Option<usize>, CoreError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<usize>()
            .map(Some)
            .map_err(|_| CoreError::ConfigInvalid(format!("{key} must be a non-negative integer, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}

fn parse_env_u32(key: &str) -> Result<Option<u32>, CoreError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u32>()
            .map(Some)
            .map_err(|_| CoreError::ConfigInvalid(format!("{key} must be a non-negative integer, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}

fn parse_env_millis(key: &str) -> Result<Option<Duration>, CoreError> {
    parse_env_u64(key).map(|opt| opt.map(Duration::from_millis))
}

fn parse_env_u64(key: &str) -> Result<Option<u64>, CoreError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| CoreError::ConfigInvalid(format!("{key} must be a non-negative integer, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}

fn parse_env_bool(key: &str) -> Result<Option<bool>, CoreError> {
    match std::env::var(key) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" => Ok(Some(false)),
            _ => Err(CoreError::ConfigInvalid(format!("{key} must be a boolean, got {raw:?}"))),
        },
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let cfg = Config::default();
        assert_eq!(cfg.bc_save_threshold_usd, 8_888.0);
        assert_eq!(cfg.amm_save_threshold_usd, 1_000.0);
        assert!(!cfg.save_all_tokens);
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(5));
        assert_eq!(cfg.max_reconnect_delay, Duration::from_secs(60));
        assert_eq!(cfg.batch_size, 50);
        assert_eq!(cfg.batch_interval, Duration::from_millis(250));
        assert_eq!(cfg.pool_size, 10);
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut cfg = Config::default();
        cfg.database_url = "postgres://localhost/test".into();
        cfg.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_backoff_bounds() {
        let mut cfg = Config::default();
        cfg.database_url = "postgres://localhost/test".into();
        cfg.max_reconnect_delay = Duration::from_secs(1);
        cfg.reconnect_delay = Duration::from_secs(5);
        assert!(cfg.validate().is_err());
    }
}
