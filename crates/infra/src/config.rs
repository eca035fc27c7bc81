//! Configuration loading and representation.

use thiserror::Error;

pub const ENV_SWEEP_ON_READ: &str = "LARDER_SWEEP_ON_READ";
pub const ENV_CONTENTION_RETRIES: &str = "LARDER_CONTENTION_RETRIES";
pub const ENV_LEGACY_RESTORE_FALLBACK: &str = "LARDER_LEGACY_RESTORE_FALLBACK";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} must be set")]
    Missing { key: &'static str },

    #[error("{key}: expected a boolean, got '{value}'")]
    InvalidBool { key: &'static str, value: String },

    #[error("{key}: expected a non-negative integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },
}

/// Fulfillment engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentConfig {
    /// Sweep expired lots before every candidate read.
    pub sweep_on_read: bool,
    /// Extra candidate refresh passes when an item is short only because
    /// conditional decrements lost races.
    pub contention_retries: u32,
    /// Credit legacy (manifest-less) cancellations to the newest active lot.
    pub legacy_restore_fallback: bool,
    /// Postgres connection string for the sqlx-backed stores.
    pub database_url: Option<String>,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            sweep_on_read: true,
            contention_retries: 2,
            legacy_restore_fallback: true,
            database_url: None,
        }
    }
}

impl FulfillmentConfig {
    /// Read configuration from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (environment, file-backed map, test fixture).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            sweep_on_read: parse_bool(ENV_SWEEP_ON_READ, lookup(ENV_SWEEP_ON_READ))?
                .unwrap_or(defaults.sweep_on_read),
            contention_retries: parse_u32(ENV_CONTENTION_RETRIES, lookup(ENV_CONTENTION_RETRIES))?
                .unwrap_or(defaults.contention_retries),
            legacy_restore_fallback: parse_bool(
                ENV_LEGACY_RESTORE_FALLBACK,
                lookup(ENV_LEGACY_RESTORE_FALLBACK),
            )?
            .unwrap_or(defaults.legacy_restore_fallback),
            database_url: lookup(ENV_DATABASE_URL).filter(|v| !v.trim().is_empty()),
        })
    }

    pub fn with_sweep_on_read(mut self, enabled: bool) -> Self {
        self.sweep_on_read = enabled;
        self
    }

    pub fn with_contention_retries(mut self, retries: u32) -> Self {
        self.contention_retries = retries;
        self
    }

    pub fn with_legacy_restore_fallback(mut self, enabled: bool) -> Self {
        self.legacy_restore_fallback = enabled;
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }
}

fn parse_bool(key: &'static str, raw: Option<String>) -> Result<Option<bool>, ConfigError> {
    let Some(value) = raw else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidBool { key, value }),
    }
}

fn parse_u32(key: &'static str, raw: Option<String>) -> Result<Option<u32>, ConfigError> {
    let Some(value) = raw else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidNumber { key, value })
}
