//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration. The pub/sub bridge is disabled when absent.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Federation configuration.
    pub federation: FederationConfig,
    /// Outbox delivery tuning.
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Archival tuning.
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL of this instance.
    pub url: String,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL, or `memory://` for the in-process store.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl DatabaseConfig {
    /// Whether the in-process memory backend was requested.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory:")
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Prefix for all pub/sub channel names.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Federation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Whether outbound delivery runs in this process.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Domain this node federates as.
    pub local_domain: String,
    /// User agent sent with every delivery.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Path of the shared inbox on remote peers.
    #[serde(default = "default_inbox_path")]
    pub inbox_path: String,
}

/// Outbox dispatcher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Number of dispatch worker loops.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum rows leased by one scan.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum rows leased across the whole pool.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Maximum concurrent target attempts for one row.
    #[serde(default = "default_target_concurrency")]
    pub target_concurrency: usize,
    /// Lease visibility timeout.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Timeout of one delivery attempt to one target.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Cycles before a row becomes terminally failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    /// Upper bound of the retry delay.
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// Growth factor between retries.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Random extra delay as a fraction of the computed delay.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// How long a peer may be unreachable before attempts are skipped.
    #[serde(default = "default_unreachable_grace_secs")]
    pub unreachable_grace_secs: u64,
    /// Pause between scans when nothing is due.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
}

impl DeliveryConfig {
    /// Lease visibility timeout as a duration.
    #[must_use]
    pub const fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    /// Per-target attempt timeout as a duration.
    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Unreachable grace period as a duration.
    #[must_use]
    pub const fn unreachable_grace(&self) -> Duration {
        Duration::from_secs(self.unreachable_grace_secs)
    }

    /// Idle pause between scans.
    #[must_use]
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            max_in_flight: default_max_in_flight(),
            target_concurrency: default_target_concurrency(),
            lease_secs: default_lease_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_ratio: default_jitter_ratio(),
            unreachable_grace_secs: default_unreachable_grace_secs(),
            scan_interval_ms: default_scan_interval_ms(),
        }
    }
}

/// Archiver configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Interval between archival runs.
    #[serde(default = "default_archive_interval_secs")]
    pub interval_secs: u64,
    /// Rows moved per batch.
    #[serde(default = "default_archive_batch_size")]
    pub batch_size: u64,
    /// Days a failed outbox row stays live for operators.
    #[serde(default = "default_failed_retention_days")]
    pub failed_retention_days: u32,
    /// Days a consumed inbound event stays live.
    #[serde(default = "default_inbound_retention_days")]
    pub inbound_retention_days: u32,
    /// Drop archive partitions older than this many months.
    #[serde(default)]
    pub prune_after_months: Option<u32>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_archive_interval_secs(),
            batch_size: default_archive_batch_size(),
            failed_retention_days: default_failed_retention_days(),
            inbound_retention_days: default_inbound_retention_days(),
            prune_after_months: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_max_connections() -> u32 {
    50
}

const fn default_min_connections() -> u32 {
    5
}

fn default_redis_prefix() -> String {
    "courier".to_string()
}

const fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("courier/{}", env!("CARGO_PKG_VERSION"))
}

fn default_inbox_path() -> String {
    "/inbox".to_string()
}

const fn default_workers() -> usize {
    4
}

const fn default_batch_size() -> usize {
    32
}

const fn default_max_in_flight() -> usize {
    256
}

const fn default_target_concurrency() -> usize {
    8
}

const fn default_lease_secs() -> u64 {
    300
}

const fn default_attempt_timeout_secs() -> u64 {
    30
}

const fn default_max_attempts() -> u32 {
    8
}

const fn default_backoff_base_secs() -> u64 {
    60
}

const fn default_backoff_max_secs() -> u64 {
    3600 * 24
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_jitter_ratio() -> f64 {
    0.2
}

const fn default_unreachable_grace_secs() -> u64 {
    3600
}

const fn default_scan_interval_ms() -> u64 {
    1000
}

const fn default_archive_interval_secs() -> u64 {
    600
}

const fn default_archive_batch_size() -> u64 {
    500
}

const fn default_failed_retention_days() -> u32 {
    14
}

const fn default_inbound_retention_days() -> u32 {
    7
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `COURIER_ENV`)
    /// 3. Environment variables with `COURIER_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        // A missing .env file is normal outside development.
        let _ = dotenvy::dotenv();

        let env = std::env::var("COURIER_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("COURIER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("COURIER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [server]
        url = "https://relay.example"

        [database]
        url = "memory://"

        [federation]
        local_domain = "relay.example"
    "#;

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse(MINIMAL);

        assert_eq!(config.server.port, 3000);
        assert!(config.database.is_memory());
        assert!(config.redis.is_none());
        assert!(config.federation.enabled);
        assert_eq!(config.federation.inbox_path, "/inbox");
        assert_eq!(config.delivery.max_attempts, 8);
        assert_eq!(config.delivery.lease_duration(), Duration::from_secs(300));
        assert_eq!(config.archive.failed_retention_days, 14);
        assert!(config.archive.prune_after_months.is_none());
        assert!(!config.logging.json);
    }

    #[test]
    fn test_delivery_overrides() {
        let toml = format!(
            "{MINIMAL}\n[delivery]\nworkers = 2\nmax_attempts = 3\nunreachable_grace_secs = 10\n"
        );
        let config = parse(&toml);

        assert_eq!(config.delivery.workers, 2);
        assert_eq!(config.delivery.max_attempts, 3);
        assert_eq!(config.delivery.unreachable_grace(), Duration::from_secs(10));
        // Untouched fields keep their defaults
        assert_eq!(config.delivery.batch_size, 32);
    }

    #[test]
    fn test_postgres_url_is_not_memory() {
        let db = DatabaseConfig {
            url: "postgres://localhost/courier".to_string(),
            max_connections: 10,
            min_connections: 1,
        };
        assert!(!db.is_memory());
    }
}
