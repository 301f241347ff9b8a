#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tb_storage::StoreOptions;

const ENV_PREFIX: &str = "TABULA_";
const MIN_AUDIT_RETENTION: usize = 100;
const MAX_AUDIT_RETENTION: usize = 50_000;
const MIN_INVITATION_TTL_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_session_default_page_size")]
    pub session_default_page_size: usize,
    #[serde(default = "default_session_max_page_size")]
    pub session_max_page_size: usize,
    #[serde(default = "default_stream_page_size")]
    pub stream_page_size: usize,
    #[serde(default = "default_audit_retention_max_events")]
    pub audit_retention_max_events: usize,
    #[serde(default = "default_invitation_ttl_secs")]
    pub invitation_ttl_secs: u64,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_read_retry_attempts")]
    pub read_retry_attempts: u32,
    /// `EnvFilter` directive used when neither `TABULA_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_log_ansi")]
    pub log_ansi: bool,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./tabula-data")
}

fn default_session_ttl_secs() -> u64 {
    600
}

fn default_session_default_page_size() -> usize {
    50
}

fn default_session_max_page_size() -> usize {
    500
}

fn default_stream_page_size() -> usize {
    200
}

fn default_audit_retention_max_events() -> usize {
    5000
}

fn default_invitation_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_read_retry_attempts() -> u32 {
    3
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_log_ansi() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            session_ttl_secs: default_session_ttl_secs(),
            session_default_page_size: default_session_default_page_size(),
            session_max_page_size: default_session_max_page_size(),
            stream_page_size: default_stream_page_size(),
            audit_retention_max_events: default_audit_retention_max_events(),
            invitation_ttl_secs: default_invitation_ttl_secs(),
            busy_timeout_ms: default_busy_timeout_ms(),
            read_retry_attempts: default_read_retry_attempts(),
            log_filter: default_log_filter(),
            log_ansi: default_log_ansi(),
        }
    }
}

impl EngineConfig {
    /// Defaults with `storage_root` pointed elsewhere.
    pub fn with_storage_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: root.into(),
            ..Self::default()
        }
    }

    /// Reads a TOML file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        Ok(config.normalized())
    }

    /// Defaults overlaid with the process's `TABULA_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `TABULA_<FIELD>` overrides read through `lookup`.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(|value| (key, value))
        };

        if let Some((_, value)) = var("STORAGE_ROOT") {
            self.storage_root = PathBuf::from(value);
        }
        if let Some((key, value)) = var("SESSION_TTL_SECS") {
            self.session_ttl_secs = parse_number(key, value)?;
        }
        if let Some((key, value)) = var("SESSION_DEFAULT_PAGE_SIZE") {
            self.session_default_page_size = parse_number(key, value)?;
        }
        if let Some((key, value)) = var("SESSION_MAX_PAGE_SIZE") {
            self.session_max_page_size = parse_number(key, value)?;
        }
        if let Some((key, value)) = var("STREAM_PAGE_SIZE") {
            self.stream_page_size = parse_number(key, value)?;
        }
        if let Some((key, value)) = var("AUDIT_RETENTION_MAX_EVENTS") {
            self.audit_retention_max_events = parse_number(key, value)?;
        }
        if let Some((key, value)) = var("INVITATION_TTL_SECS") {
            self.invitation_ttl_secs = parse_number(key, value)?;
        }
        if let Some((key, value)) = var("BUSY_TIMEOUT_MS") {
            self.busy_timeout_ms = parse_number(key, value)?;
        }
        if let Some((key, value)) = var("READ_RETRY_ATTEMPTS") {
            self.read_retry_attempts = parse_number(key, value)?;
        }
        if let Some((_, value)) = var("LOG_FILTER") {
            self.log_filter = value;
        }
        if let Some((key, value)) = var("LOG_ANSI") {
            self.log_ansi = parse_bool(key, value)?;
        }
        Ok(self.normalized())
    }

    /// Clamps every bound into its supported range.
    pub fn normalized(mut self) -> Self {
        self.session_ttl_secs = self.session_ttl_secs.max(1);
        self.session_max_page_size = self.session_max_page_size.max(1);
        self.session_default_page_size = self
            .session_default_page_size
            .clamp(1, self.session_max_page_size);
        self.stream_page_size = self.stream_page_size.max(1);
        self.audit_retention_max_events = self
            .audit_retention_max_events
            .clamp(MIN_AUDIT_RETENTION, MAX_AUDIT_RETENTION);
        self.invitation_ttl_secs = self.invitation_ttl_secs.max(MIN_INVITATION_TTL_SECS);
        self.read_retry_attempts = self.read_retry_attempts.max(1);
        self
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            read_retry_attempts: self.read_retry_attempts,
            audit_retention: self.audit_retention_max_events,
        }
    }

    pub(crate) fn session_ttl_ms(&self) -> i64 {
        secs_to_ms(self.session_ttl_secs)
    }

    pub(crate) fn invitation_ttl_ms(&self) -> i64 {
        secs_to_ms(self.invitation_ttl_secs)
    }
}

pub(crate) fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

fn parse_number<T: std::str::FromStr>(key: String, value: String) -> Result<T, ConfigError> {
    value
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}

fn parse_bool(key: String, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { key, value }),
    }
}
