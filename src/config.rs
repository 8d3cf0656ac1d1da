//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::queue::live_queue::CacheTtls;
use crate::{AppError, Result};

/// Cache lifetimes (seconds) for each result shape.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    /// Global live queue TTL.
    #[serde(default = "default_global_queue_seconds")]
    pub global_queue_seconds: u64,
    /// Partner-scoped queue TTL.
    #[serde(default = "default_partner_queue_seconds")]
    pub partner_queue_seconds: u64,
    /// Lower bound for listing TTLs (small, simple listings).
    #[serde(default = "default_listing_min_seconds")]
    pub listing_min_seconds: u64,
    /// Upper bound for listing TTLs (large, heavily filtered listings).
    #[serde(default = "default_listing_max_seconds")]
    pub listing_max_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            global_queue_seconds: default_global_queue_seconds(),
            partner_queue_seconds: default_partner_queue_seconds(),
            listing_min_seconds: default_listing_min_seconds(),
            listing_max_seconds: default_listing_max_seconds(),
        }
    }
}

/// Conversation store access settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// Ceiling for a single candidate query before it counts as a failure.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

fn default_global_queue_seconds() -> u64 {
    20
}

fn default_partner_queue_seconds() -> u64 {
    30
}

fn default_listing_min_seconds() -> u64 {
    180
}

fn default_listing_max_seconds() -> u64 {
    600
}

fn default_query_timeout_ms() -> u64 {
    3000
}

fn default_http_port() -> u16 {
    8080
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/support-desk.db")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// HTTP port for the dashboard API.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// `SQLite` database file backing the conversation store.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Cache lifetimes.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Conversation store access settings.
    #[serde(default)]
    pub store: StoreConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Ceiling applied to every store query issued by the query executor.
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.store.query_timeout_ms)
    }

    /// TTL policy handed to the live queue.
    #[must_use]
    pub fn cache_ttls(&self) -> CacheTtls {
        CacheTtls {
            global_queue: Duration::from_secs(self.cache.global_queue_seconds),
            partner_queue: Duration::from_secs(self.cache.partner_queue_seconds),
            listing_min: Duration::from_secs(self.cache.listing_min_seconds),
            listing_max: Duration::from_secs(self.cache.listing_max_seconds),
        }
    }

    fn validate(&self) -> Result<()> {
        let cache = &self.cache;

        if !(20..=30).contains(&cache.global_queue_seconds) {
            return Err(AppError::Config(
                "cache.global_queue_seconds must be between 20 and 30".into(),
            ));
        }

        if cache.partner_queue_seconds == 0 {
            return Err(AppError::Config(
                "cache.partner_queue_seconds must be greater than zero".into(),
            ));
        }

        if !(180..=600).contains(&cache.listing_min_seconds)
            || !(180..=600).contains(&cache.listing_max_seconds)
        {
            return Err(AppError::Config(
                "cache listing ttls must be between 180 and 600 seconds".into(),
            ));
        }

        if cache.listing_min_seconds > cache.listing_max_seconds {
            return Err(AppError::Config(
                "cache.listing_min_seconds must not exceed cache.listing_max_seconds".into(),
            ));
        }

        if !(1..=10_000).contains(&self.store.query_timeout_ms) {
            return Err(AppError::Config(
                "store.query_timeout_ms must be between 1 and 10000".into(),
            ));
        }

        Ok(())
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            database_path: default_database_path(),
            cache: CacheConfig::default(),
            store: StoreConfig::default(),
        }
    }
}
