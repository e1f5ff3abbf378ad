//! Configuration for colspool clients

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for the PostgreSQL driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database name
    pub database: String,
    /// User name (driver default applies if unset)
    pub user: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Application name reported to the server
    pub application_name: String,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            host: env_or_default("COLSPOOL_DB_HOST", "localhost"),
            port: env_parse_or_default("COLSPOOL_DB_PORT", 5432),
            database: env_or_default("COLSPOOL_DB_NAME", "postgres"),
            user: std::env::var("COLSPOOL_DB_USER").ok(),
            password: std::env::var("COLSPOOL_DB_PASSWORD").ok(),
            application_name: "colspool".to_string(),
        }
    }
}

/// Fetch/conversion pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Rows fetched from the cursor per batch
    pub batch_rows: usize,
    /// Fixed length for text columns; longer values are truncated
    pub str_length: usize,
    /// Infer integer and bool columns as float64 so SQL NULLs become NaN
    pub mask_null: bool,
    /// Statement run after the cursor opens, before the query.
    /// Defaults to `SET cursor_tuple_fraction TO 1` on the PostgreSQL
    /// driver so the planner optimizes for full retrieval.
    pub preamble: Option<String>,
    /// Conversion worker poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Grace period in milliseconds to wait for the worker after
    /// cancellation. Must exceed the poll interval; enforced at use.
    pub join_grace_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            batch_rows: env_parse_or_default("COLSPOOL_BATCH_ROWS", 100_000),
            str_length: env_parse_or_default("COLSPOOL_STR_LENGTH", 10),
            mask_null: false,
            preamble: None,
            poll_interval_ms: env_parse_or_default("COLSPOOL_POLL_INTERVAL_MS", 100),
            join_grace_ms: env_parse_or_default("COLSPOOL_JOIN_GRACE_MS", 250),
        }
    }
}

impl FetchConfig {
    /// Worker poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Post-cancellation join grace, clamped strictly above the poll
    /// interval so the worker is guaranteed at least one more poll.
    pub fn join_grace(&self) -> Duration {
        let floor = self.poll_interval() + Duration::from_millis(20);
        Duration::from_millis(self.join_grace_ms).max(floor)
    }
}

/// Full client configuration: where to connect and how to fetch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    pub connect: ConnectConfig,
    pub fetch: FetchConfig,
}

/// Load configuration from environment variables
pub fn load_from_env<T: for<'de> Deserialize<'de>>(prefix: &str) -> Result<T, config::ConfigError> {
    config::Config::builder()
        .add_source(config::Environment::with_prefix(prefix).separator("__"))
        .build()?
        .try_deserialize()
}

/// Get environment variable with default
pub fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get environment variable as parsed type with default
pub fn env_parse_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
