// ============================
// callverify backend-lib/src/config.rs
// ============================
//! Configuration management.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `CALLVERIFY_`-prefixed environment variables (nested keys use `__`, e.g.
//! `CALLVERIFY_PROVIDER__BASE_URL`).
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Default configuration file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "callverify.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CALLVERIFY_";

/// Bounds the provider accepts for the verification window.
pub const MIN_TIMEOUT_SECS: u32 = 30;
pub const MAX_TIMEOUT_SECS: u32 = 120;
pub const DEFAULT_TIMEOUT_SECS: u32 = 60;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["text", "json"];

/// Application settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Path of the session database file
    pub storage_path: PathBuf,
    /// Log level used when `RUST_LOG` is unset
    pub log_level: String,
    /// `text` or `json`
    pub log_format: String,
    /// Provider API access key
    pub access_key: String,
    /// Provider API signing key
    pub signature_key: String,
    /// Verification window in seconds
    pub timeout_secs: u32,
    /// Externally reachable base URL used to build the callback link.
    /// Falls back to the request's `Host` header when unset.
    pub public_base_url: Option<String>,
    pub provider: ProviderSettings,
    pub retention: RetentionSettings,
    pub rate_limit: RateLimitSettings,
}

/// Outbound provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub base_url: String,
    /// Upper bound for a single provider request
    pub request_timeout_secs: u64,
    /// Extra attempts after a failed connection
    pub connect_retries: u32,
}

/// Stale session purge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    /// How long a session is kept after it expires
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
}

/// Rate limiting for `action=start`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            storage_path: PathBuf::from("sessions.redb"),
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            access_key: String::new(),
            signature_key: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            public_base_url: None,
            provider: ProviderSettings::default(),
            retention: RetentionSettings::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.new-tel.net".to_string(),
            request_timeout_secs: 5,
            connect_retries: 2,
        }
    }
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            retention_secs: 60 * 60 * 24, // 1 day
            sweep_interval_secs: 60 * 60,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_secs: 60,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("bind_addr", &self.bind_addr)
            .field("storage_path", &self.storage_path)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("access_key", &"<redacted>")
            .field("signature_key", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .field("public_base_url", &self.public_base_url)
            .field("provider", &self.provider)
            .field("retention", &self.retention)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

impl Settings {
    /// Load settings from `callverify.toml` (if present) and the environment.
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load settings from the given TOML file (if present) and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check invariants the rest of the server relies on.
    pub fn validate(&self) -> Result<(), AppError> {
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            return Err(AppError::Config(format!(
                "timeout_secs must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS}, got {}",
                self.timeout_secs
            )));
        }

        if self.access_key.is_empty() || self.signature_key.is_empty() {
            return Err(AppError::Config(
                "access_key and signature_key must be set".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(AppError::Config(format!(
                "Invalid log level: {}",
                self.log_level
            )));
        }

        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            return Err(AppError::Config(format!(
                "Invalid log format: {}",
                self.log_format
            )));
        }

        check_http_url("provider.base_url", &self.provider.base_url)?;
        if let Some(url) = &self.public_base_url {
            check_http_url("public_base_url", url)?;
        }

        if self.provider.request_timeout_secs == 0 {
            return Err(AppError::Config(
                "provider.request_timeout_secs must be positive".to_string(),
            ));
        }

        if self.retention.sweep_interval_secs == 0 {
            return Err(AppError::Config(
                "retention.sweep_interval_secs must be positive".to_string(),
            ));
        }

        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            return Err(AppError::Config(
                "rate_limit values must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.request_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention.sweep_interval_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_secs)
    }
}

fn check_http_url(name: &str, url: &str) -> Result<(), AppError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| AppError::Config(format!("{name} is not a valid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(AppError::Config(format!(
            "{name} must use http or https, got {other}"
        ))),
    }
}
