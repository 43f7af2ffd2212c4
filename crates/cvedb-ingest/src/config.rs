//! Importer configuration
//!
//! Settings come from the environment (a `.env` file is loaded first when
//! present). The source URL and the database URL are required; everything
//! else has a default.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{IngestError, Result};

// ============================================================================
// Import Configuration Constants
// ============================================================================

/// Default number of records requested per page.
pub const DEFAULT_RESULTS_PER_PAGE: u64 = 200;

/// Default pause between pages, in milliseconds.
pub const DEFAULT_DELAY_MS: u64 = 5000;

/// Default number of concurrent upsert workers.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default number of extra attempts for a failed page fetch.
pub const DEFAULT_FETCH_MAX_RETRIES: u32 = 0;

/// Default initial backoff before retrying a page fetch, in milliseconds.
pub const DEFAULT_FETCH_RETRY_BACKOFF_MS: u64 = 1000;

/// Default HTTP timeout for the source client, in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Default database pool acquire timeout, in seconds.
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// The NVD API refuses pages larger than this.
pub const MAX_RESULTS_PER_PAGE: u64 = 2000;

/// Upper bound on concurrent upsert workers.
pub const MAX_CONCURRENCY: usize = 1024;

/// Pool size for `concurrency` workers plus one spare connection for the
/// orchestrator, saturating at `u32::MAX`.
pub fn default_max_connections(concurrency: usize) -> u32 {
    u32::try_from(concurrency)
        .ok()
        .and_then(|c| c.checked_add(1))
        .unwrap_or(u32::MAX)
}

/// Import configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Base URL of the CVE catalog endpoint (`NVD_API_BASE_URL`)
    pub source_url: String,
    pub database: DatabaseConfig,
    /// Records requested per page (`RESULTS_PER_PAGE`)
    pub results_per_page: u64,
    /// Pause between pages (`DELAY_MS`)
    pub delay_ms: u64,
    /// Concurrent upsert workers (`CONCURRENCY`)
    pub concurrency: usize,
    /// Extra attempts for a failed page fetch (`FETCH_MAX_RETRIES`)
    pub fetch_max_retries: u32,
    /// Initial backoff between fetch attempts (`FETCH_RETRY_BACKOFF_MS`)
    pub fetch_retry_backoff_ms: u64,
    /// HTTP timeout for source requests (`NVD_HTTP_TIMEOUT_SECS`)
    pub http_timeout_secs: u64,
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl DatabaseConfig {
    /// Database settings on their own, for commands that never touch the source.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(&|key: &str| std::env::var(key).ok(), default_max_connections(DEFAULT_CONCURRENCY))
    }

    /// `default_max_connections` applies when `DB_MAX_CONNECTIONS` is unset.
    pub fn from_vars<F>(lookup: &F, default_max_connections: u32) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            url: required(lookup, "DATABASE_URL")?,
            max_connections: parsed(lookup, "DB_MAX_CONNECTIONS")?
                .unwrap_or(default_max_connections),
            connect_timeout_secs: parsed(lookup, "DB_CONNECT_TIMEOUT")?
                .unwrap_or(DEFAULT_DB_CONNECT_TIMEOUT_SECS),
        })
    }
}

impl ImportConfig {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source_url = required(&lookup, "NVD_API_BASE_URL")?;
        let concurrency = parsed(&lookup, "CONCURRENCY")?.unwrap_or(DEFAULT_CONCURRENCY);

        let config = Self {
            source_url,
            database: DatabaseConfig::from_vars(&lookup, default_max_connections(concurrency))?,
            results_per_page: parsed(&lookup, "RESULTS_PER_PAGE")?
                .unwrap_or(DEFAULT_RESULTS_PER_PAGE),
            delay_ms: parsed(&lookup, "DELAY_MS")?.unwrap_or(DEFAULT_DELAY_MS),
            concurrency,
            fetch_max_retries: parsed(&lookup, "FETCH_MAX_RETRIES")?
                .unwrap_or(DEFAULT_FETCH_MAX_RETRIES),
            fetch_retry_backoff_ms: parsed(&lookup, "FETCH_RETRY_BACKOFF_MS")?
                .unwrap_or(DEFAULT_FETCH_RETRY_BACKOFF_MS),
            http_timeout_secs: parsed(&lookup, "NVD_HTTP_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.source_url.trim().is_empty() {
            return Err(IngestError::Config("NVD_API_BASE_URL cannot be empty".into()));
        }
        if self.database.url.trim().is_empty() {
            return Err(IngestError::Config("DATABASE_URL cannot be empty".into()));
        }
        if self.results_per_page == 0 || self.results_per_page > MAX_RESULTS_PER_PAGE {
            return Err(IngestError::Config(format!(
                "RESULTS_PER_PAGE must be between 1 and {}, got {}",
                MAX_RESULTS_PER_PAGE, self.results_per_page
            )));
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(IngestError::Config(format!(
                "CONCURRENCY must be between 1 and {}, got {}",
                MAX_CONCURRENCY, self.concurrency
            )));
        }
        if self.database.max_connections == 0 {
            return Err(IngestError::Config(
                "DB_MAX_CONNECTIONS must be greater than 0".into(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(IngestError::Config(
                "NVD_HTTP_TIMEOUT_SECS must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_backoff_ms)
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| IngestError::Config(format!("{} is not set", key)))
}

/// Unset or blank means "use the default"; a present but unparseable value is an error.
fn parsed<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| IngestError::Config(format!("{}='{}' is invalid: {}", key, raw, e))),
        _ => Ok(None),
    }
}
