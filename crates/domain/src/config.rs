//! Configuration tree. Loaded from `reefcore.toml` with serde defaults,
//! then overlaid with the environment variables each deployment script
//! sets (`DATABASE_URL`, `SCHEDULER_INTERVAL`, ...).

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_8421")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Environment variable holding the user-facing API bearer token.
    /// Unset env var = dev mode (no auth enforced).
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
    /// Environment variable holding the service-to-service bearer token.
    #[serde(default = "d_service_token_env")]
    pub service_token_env: String,
    /// Per-request handler deadline in seconds.
    #[serde(default = "d_30")]
    pub request_timeout_secs: u64,
    #[serde(default = "d_256")]
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8421,
            host: "127.0.0.1".into(),
            cors: CorsConfig::default(),
            api_token_env: d_api_token_env(),
            service_token_env: d_service_token_env(),
            request_timeout_secs: 30,
            max_concurrent_requests: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Exact origins allowed for CORS, or `["*"]` for permissive (dev
    /// only). Anything richer belongs in the front proxy.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Database
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection string; `DATABASE_URL` overrides.
    #[serde(default = "d_db_url")]
    pub url: String,
    #[serde(default = "d_10")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: d_db_url(),
            max_connections: 10,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accepted scheduler tick range in seconds.
pub const SCHEDULER_INTERVAL_RANGE: (u64, u64) = (5, 3600);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run the scheduler worker inside `serve`.
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Tick interval in seconds; clamped to [5, 3600].
    #[serde(default = "d_30u")]
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
        }
    }
}

impl SchedulerConfig {
    /// Tick interval clamped to the accepted range.
    pub fn clamped_interval_secs(&self) -> u64 {
        self.interval_secs
            .clamp(SCHEDULER_INTERVAL_RANGE.0, SCHEDULER_INTERVAL_RANGE.1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Seconds between device-registry rebuilds.
    #[serde(default = "d_300u")]
    pub refresh_interval_secs: u64,
    /// Readings older than this many days are swept.
    #[serde(default = "d_90u")]
    pub retention_days: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_secs: 300,
            retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Seconds between evaluation cycles.
    #[serde(default = "d_30u")]
    pub interval_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Env overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Overlay the environment variables recognized per deployment:
    /// `DATABASE_URL`, `SCHEDULER_INTERVAL`, `POLLER_REFRESH_INTERVAL`,
    /// `HISTORY_RETENTION_DAYS`, `ALLOWED_HOSTS` (JSON array of origins).
    ///
    /// Unparseable values are logged and skipped, never fatal.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                self.database.url = url;
            }
        }
        if let Some(secs) = env_u64("SCHEDULER_INTERVAL") {
            self.scheduler.interval_secs = secs;
        }
        if let Some(secs) = env_u64("POLLER_REFRESH_INTERVAL") {
            self.poller.refresh_interval_secs = secs;
        }
        if let Some(days) = env_u64("HISTORY_RETENTION_DAYS") {
            self.poller.retention_days = days;
        }
        if let Ok(hosts) = std::env::var("ALLOWED_HOSTS") {
            match serde_json::from_str::<Vec<String>>(&hosts) {
                Ok(origins) if !origins.is_empty() => {
                    self.server.cors.allowed_origins = origins;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "ALLOWED_HOSTS is not a JSON array, ignoring");
                }
            }
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "not a number, ignoring");
            None
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        let mut error = |field: &str, message: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message,
            });
        };

        if self.server.port == 0 {
            error("server.port", "port must be greater than 0".into());
        }
        if self.server.host.is_empty() {
            error("server.host", "host must not be empty".into());
        }
        if self.database.url.is_empty() {
            error("database.url", "connection string must not be empty".into());
        }
        if self.database.max_connections == 0 {
            error("database.max_connections", "pool size must be at least 1".into());
        }
        if self.poller.refresh_interval_secs < 5 {
            error(
                "poller.refresh_interval_secs",
                format!(
                    "refresh interval must be >= 5 seconds (got {})",
                    self.poller.refresh_interval_secs
                ),
            );
        }
        if self.poller.retention_days == 0 {
            error("poller.retention_days", "retention must be at least 1 day".into());
        }
        if self.alerts.interval_secs == 0 {
            error("alerts.interval_secs", "interval must be at least 1 second".into());
        }

        let (lo, hi) = SCHEDULER_INTERVAL_RANGE;
        if !(lo..=hi).contains(&self.scheduler.interval_secs) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "scheduler.interval_secs".into(),
                message: format!(
                    "{} outside accepted range {lo}..={hi}, will be clamped",
                    self.scheduler.interval_secs
                ),
            });
        }

        if self.server.cors.allowed_origins.iter().any(|o| o == "*") {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)"
                    .into(),
            });
        }

        issues
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_8421() -> u16 {
    8421
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:8421".into(),
        "http://127.0.0.1:8421".into(),
    ]
}
fn d_api_token_env() -> String {
    "REEF_API_TOKEN".into()
}
fn d_service_token_env() -> String {
    "SERVICE_TOKEN".into()
}
fn d_db_url() -> String {
    "sqlite://reefcore.db?mode=rwc".into()
}
fn d_true() -> bool {
    true
}
fn d_10() -> u32 {
    10
}
fn d_30() -> u64 {
    30
}
fn d_256() -> usize {
    256
}
fn d_30u() -> u64 {
    30
}
fn d_300u() -> u64 {
    300
}
fn d_90u() -> u64 {
    90
}
