use serde::{Deserialize, Serialize};

/// Main configuration structure for the Sentinel daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP surface configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Job queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Realtime monitor configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Agent authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            http: HttpConfig::default(),
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig::default(),
            monitor: MonitorConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".sentinel/sentinel.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for daily-rotated log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}

/// HTTP surface configuration (agent API, webhook intake, realtime channel)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HttpConfig {
    #[serde(default = "default_http_host")]
    pub host: String,

    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Whether to add a permissive CORS layer
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

fn default_http_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_http_port() -> u16 {
    8480
}

const fn default_true() -> bool {
    true
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
            enable_cors: default_true(),
        }
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    /// Maximum number of pending jobs across all bands
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Number of long-lived worker fibers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Base retry delay; the effective delay is `base × attempts`
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Per-job timeout applied during drain at shutdown
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Completed/failed history entries older than this are evicted
    #[serde(default = "default_history_retention_secs")]
    pub history_retention_secs: u64,

    /// How often the history cleanup runs
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

const fn default_max_queue_size() -> usize {
    10_000
}

const fn default_concurrency() -> usize {
    5
}

const fn default_retry_delay_secs() -> u64 {
    5
}

const fn default_job_timeout_secs() -> u64 {
    60
}

const fn default_history_retention_secs() -> u64 {
    24 * 60 * 60
}

const fn default_cleanup_interval_secs() -> u64 {
    60 * 60
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            concurrency: default_concurrency(),
            retry_delay_secs: default_retry_delay_secs(),
            job_timeout_secs: default_job_timeout_secs(),
            history_retention_secs: default_history_retention_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Tick interval in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

const fn default_tick_interval_ms() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Realtime monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Metrics collection interval in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Snapshots retained per connector
    #[serde(default = "default_history_len")]
    pub history_len: usize,

    /// Keep-alive probe interval per sink, in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

const fn default_poll_interval_secs() -> u64 {
    10
}

const fn default_history_len() -> usize {
    100
}

const fn default_keepalive_secs() -> u64 {
    30
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            history_len: default_history_len(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

/// Agent authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuthConfig {
    /// HS256 secret for agent bearer tokens
    #[serde(default = "default_token_secret")]
    pub agent_token_secret: String,

    /// Token lifetime in days
    #[serde(default = "default_token_ttl_days")]
    pub token_ttl_days: i64,
}

fn default_token_secret() -> String {
    // Overridden in any real deployment via SENTINEL_AUTH__AGENT_TOKEN_SECRET.
    "change-me".to_string()
}

const fn default_token_ttl_days() -> i64 {
    365
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            agent_token_secret: default_token_secret(),
            token_ttl_days: default_token_ttl_days(),
        }
    }
}
