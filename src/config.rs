//! Configuration module for RSS Monitor.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::feed::IdentityPolicy;
use crate::notify::NotificationSink;
use crate::{MonitorError, Result};

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/rss-monitor.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Feed fetcher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Maximum feed size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// Maximum summary length in characters.
    #[serde(default = "default_max_summary_length")]
    pub max_summary_length: usize,
    /// Retries after the first attempt, for network errors only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry; doubled on every further retry.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    /// Global cap on outbound requests per minute (0 = unlimited).
    #[serde(default)]
    pub requests_per_minute: u32,
    /// How items without a GUID get their identity.
    #[serde(default)]
    pub identity_policy: IdentityPolicy,
    /// Skip the private-address check (test setups against local servers).
    #[serde(default)]
    pub allow_private_hosts: bool,
}

fn default_user_agent() -> String {
    "RSS-Monitor/1.0".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_feed_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_max_summary_length() -> usize {
    10000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    1000
}

impl FetchConfig {
    /// Total request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout(),
            timeout_secs: default_request_timeout(),
            max_redirects: default_max_redirects(),
            max_feed_size_bytes: default_max_feed_size(),
            max_summary_length: default_max_summary_length(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            requests_per_minute: 0,
            identity_policy: IdentityPolicy::default(),
            allow_private_hosts: false,
        }
    }
}

/// Feed cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// How long a snapshot satisfies non-forced reads, in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

fn default_cache_ttl() -> u64 {
    1800 // 30 minutes
}

impl CacheConfig {
    /// Snapshot time-to-live.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
        }
    }
}

/// Change detector configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Maximum identities retained per subscription.
    #[serde(default = "default_retained_ids")]
    pub retained_ids: usize,
}

fn default_retained_ids() -> usize {
    500
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            retained_ids: default_retained_ids(),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Capacity of the scheduler's message queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Maximum number of cycles running at the same time.
    #[serde(default = "default_max_concurrent_cycles")]
    pub max_concurrent_cycles: usize,
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_concurrent_cycles() -> usize {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_concurrent_cycles: default_max_concurrent_cycles(),
        }
    }
}

/// Client configuration storage.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding per-client configuration files.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Notification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Pickup directory for outgoing mail.
    #[serde(default = "default_mail_spool_dir")]
    pub mail_spool_dir: String,
    /// Sender address for outgoing mail.
    #[serde(default = "default_mail_from")]
    pub mail_from: String,
    /// Timezone for dates in notification bodies (e.g., "Asia/Tokyo", "UTC").
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Request timeout for webhook and chat deliveries in seconds.
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,
    /// Sinks notified for every client in addition to the client's own.
    #[serde(default)]
    pub sinks: Vec<NotificationSink>,
}

fn default_mail_spool_dir() -> String {
    "data/outbox".to_string()
}

fn default_mail_from() -> String {
    "rss-monitor@localhost".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_delivery_timeout() -> u64 {
    10
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            mail_spool_dir: default_mail_spool_dir(),
            mail_from: default_mail_from(),
            timezone: default_timezone(),
            delivery_timeout_secs: default_delivery_timeout(),
            sinks: Vec::new(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Fetcher configuration.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Change detector configuration.
    #[serde(default)]
    pub detector: DetectorConfig,
    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Notification configuration.
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| MonitorError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `RSS_MONITOR_DATA_DIR`: Override the storage directory
    /// - `RSS_MONITOR_USER_AGENT`: Override the fetcher user agent
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("RSS_MONITOR_DATA_DIR") {
            if !dir.is_empty() {
                self.storage.data_dir = dir;
            }
        }
        if let Ok(agent) = std::env::var("RSS_MONITOR_USER_AGENT") {
            if !agent.is_empty() {
                self.fetch.user_agent = agent;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.fetch.timeout_secs == 0 {
            return Err(MonitorError::Config(
                "fetch.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.detector.retained_ids == 0 {
            return Err(MonitorError::Config(
                "detector.retained_ids must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.max_concurrent_cycles == 0 || self.scheduler.queue_capacity == 0 {
            return Err(MonitorError::Config(
                "scheduler limits must be greater than zero".to_string(),
            ));
        }
        if self.notify.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(MonitorError::Config(format!(
                "unknown timezone: {}",
                self.notify.timezone
            )));
        }
        Ok(())
    }
}
