//! Configuration loading and validation.
//!
//! Settings are read once from a TOML file (with environment overrides for
//! credentials) and handed to the fetch chain, scheduler and dispatcher at
//! construction time. Nothing here is mutated after startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum allowed per-site check interval. Prevents sub-minute polling.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Errors produced while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the SQLite database file.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    #[serde(default)]
    pub fetch: FetchSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub notify: NotifySettings,
}

fn default_database() -> PathBuf {
    PathBuf::from("sitewatch.db")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: default_database(),
            fetch: FetchSettings::default(),
            scheduler: SchedulerSettings::default(),
            notify: NotifySettings::default(),
        }
    }
}

/// Fetch strategy chain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Timeout for the plain HTTP method, in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Timeout for the headless browser method, in seconds.
    #[serde(default = "default_browser_timeout")]
    pub browser_timeout_secs: u64,

    /// Extra settle time after page load for dynamic content, in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub browser_settle_ms: u64,

    /// Courtesy delay between method attempts, in milliseconds.
    #[serde(default = "default_attempt_delay")]
    pub attempt_delay_ms: u64,

    /// Responses with fewer bytes than this are treated as suspect and
    /// escalate to the next method even on HTTP success.
    #[serde(default = "default_min_content_len")]
    pub min_content_len: usize,

    /// Maximum redirects to follow.
    #[serde(default = "default_redirect_limit")]
    pub redirect_limit: usize,
}

fn default_http_timeout() -> u64 {
    30
}

fn default_browser_timeout() -> u64 {
    45
}

fn default_settle_ms() -> u64 {
    2000
}

fn default_attempt_delay() -> u64 {
    1000
}

fn default_min_content_len() -> usize {
    64
}

fn default_redirect_limit() -> usize {
    5
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout(),
            browser_timeout_secs: default_browser_timeout(),
            browser_settle_ms: default_settle_ms(),
            attempt_delay_ms: default_attempt_delay(),
            min_content_len: default_min_content_len(),
            redirect_limit: default_redirect_limit(),
        }
    }
}

impl FetchSettings {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn browser_timeout(&self) -> Duration {
        Duration::from_secs(self.browser_timeout_secs)
    }

    pub fn browser_settle(&self) -> Duration {
        Duration::from_millis(self.browser_settle_ms)
    }

    pub fn attempt_delay(&self) -> Duration {
        Duration::from_millis(self.attempt_delay_ms)
    }
}

/// Check scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Global tick cadence, in seconds.
    #[serde(default = "default_tick")]
    pub tick_secs: u64,

    /// Maximum number of site checks running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_checks: usize,

    /// Delay between dispatching sequential site checks within one tick,
    /// in milliseconds. A courtesy toward target servers.
    #[serde(default = "default_site_delay")]
    pub site_delay_ms: u64,
}

fn default_tick() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    4
}

fn default_site_delay() -> u64 {
    500
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_secs: default_tick(),
            max_concurrent_checks: default_max_concurrent(),
            site_delay_ms: default_site_delay(),
        }
    }
}

impl SchedulerSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn site_delay(&self) -> Duration {
        Duration::from_millis(self.site_delay_ms)
    }
}

/// Notification settings. A channel left unconfigured is skipped, never an
/// error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifySettings {
    /// Per-channel send timeout, in seconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    #[serde(default)]
    pub email: Option<EmailConfig>,

    #[serde(default)]
    pub line: Option<LineConfig>,

    /// Recipient for digest-style notifications about structural events
    /// (site added, site disabled). Requires the email channel.
    #[serde(default)]
    pub admin_email: Option<String>,
}

fn default_send_timeout() -> u64 {
    15
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            send_timeout_secs: default_send_timeout(),
            email: None,
            line: None,
            admin_email: None,
        }
    }
}

impl NotifySettings {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// SMTP email channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    pub username: String,

    /// Overridable via SITEWATCH_SMTP_PASSWORD.
    #[serde(default)]
    pub password: String,

    /// From address, e.g. "sitewatch <watch@example.com>".
    pub from: String,
}

fn default_smtp_port() -> u16 {
    587
}

/// LINE Messaging API channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineConfig {
    /// Overridable via SITEWATCH_LINE_TOKEN.
    #[serde(default)]
    pub channel_access_token: String,

    /// Push endpoint. Only overridden in tests.
    #[serde(default = "default_line_endpoint")]
    pub endpoint: String,
}

fn default_line_endpoint() -> String {
    "https://api.line.me/v2/bot/message/push".to_string()
}

impl Settings {
    /// Load settings from a TOML file, falling back to defaults when the
    /// file does not exist. Credentials are then overridden from the
    /// environment and the result validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or_else(|| Path::new("sitewatch.toml"));

        let mut settings = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            Settings::default()
        };

        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Pull credentials from the environment. Secrets belong in the
    /// environment or .env, not in the config file.
    fn apply_env_overrides(&mut self) {
        if let Some(email) = self.notify.email.as_mut() {
            if let Ok(password) = std::env::var("SITEWATCH_SMTP_PASSWORD") {
                email.password = password;
            }
        }
        if let Some(line) = self.notify.line.as_mut() {
            if let Ok(token) = std::env::var("SITEWATCH_LINE_TOKEN") {
                line.channel_access_token = token;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.tick_secs == 0 {
            return Err(ConfigError::Invalid("scheduler.tick_secs must be > 0".into()));
        }
        if self.scheduler.max_concurrent_checks == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_concurrent_checks must be > 0".into(),
            ));
        }
        if self.fetch.http_timeout_secs == 0 || self.fetch.browser_timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch timeouts must be > 0".into()));
        }
        if let Some(email) = &self.notify.email {
            if email.host.is_empty() {
                return Err(ConfigError::Invalid("notify.email.host is empty".into()));
            }
            if email.from.is_empty() {
                return Err(ConfigError::Invalid("notify.email.from is empty".into()));
            }
        }
        if self.notify.admin_email.is_some() && self.notify.email.is_none() {
            return Err(ConfigError::Invalid(
                "notify.admin_email requires the email channel to be configured".into(),
            ));
        }
        Ok(())
    }
}
