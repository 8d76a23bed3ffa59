use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::TransportKind;

/// Top-level configuration loaded from `~/.gantry/config.toml`.
///
/// Credentials appear here only as the raw per-system secrets supplied by the
/// operator; they are digested and zeroized during bridge construction and
/// never held beyond it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    /// One entry per external system, keyed by system id.
    #[serde(default)]
    pub systems: BTreeMap<String, SystemConfig>,
}

impl Config {
    /// Load config from `~/.gantry/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Semantic validation for settings not expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dispatch.validate()?;
        self.rate_limit.validate()?;
        for (id, system) in &self.systems {
            system.validate(id)?;
        }
        Ok(())
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gantry")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `human` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "human".into()
}

/// Retry and loop-pacing knobs for the background dispatch loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Delivery attempts before a message is dropped as permanently failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay; the n-th retry waits `retry_delay * 2^(n-1)`.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Sleep when the queue is empty or nothing is eligible.
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    /// Deferral applied when a message hits the rate limit at dispatch time.
    /// Unset = derived from the system's quota (`window / max_requests`).
    #[serde(default)]
    pub rate_limit_defer_ms: Option<u64>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            idle_interval_ms: default_idle_interval_ms(),
            rate_limit_defer_ms: None,
        }
    }
}

impl DispatchSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Validation(
                "dispatch.max_retries must be at least 1".into(),
            ));
        }
        if self.retry_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "dispatch.retry_delay_ms must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_idle_interval_ms() -> u64 {
    100
}

/// Default sliding-window quota, overridable per system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_time_window_secs")]
    pub time_window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            time_window_secs: default_time_window_secs(),
        }
    }
}

impl RateLimitSettings {
    pub fn time_window(&self) -> Duration {
        Duration::from_secs(self.time_window_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::Validation(
                "rate_limit.max_requests must be at least 1".into(),
            ));
        }
        if self.time_window_secs == 0 {
            return Err(ConfigError::Validation(
                "rate_limit.time_window_secs must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_requests() -> usize {
    60
}
fn default_time_window_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_bind")]
    pub bind: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
            bind: default_metrics_bind(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9464
}
fn default_metrics_bind() -> String {
    "127.0.0.1".into()
}

// ---------------------------------------------------------------------------
// Per-system configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Shared secret presented by callers of `authenticate_system`.
    pub credentials: String,
    pub transport: TransportConfig,
    /// JSON Schema the internal message representation must satisfy.
    pub schema: serde_json::Value,
    /// Field mapping tables; absent = identity (no projection).
    #[serde(default)]
    pub mappings: Option<MappingConfig>,
    /// Overrides the global `[rate_limit]` quota for this system.
    #[serde(default)]
    pub rate_limit: Option<RateLimitSettings>,
}

impl SystemConfig {
    fn validate(&self, id: &str) -> Result<(), ConfigError> {
        if self.credentials.is_empty() {
            return Err(ConfigError::Validation(format!(
                "systems.{id}: credentials must not be empty"
            )));
        }
        self.transport.validate(id)?;
        if !self.schema.is_object() {
            return Err(ConfigError::Validation(format!(
                "systems.{id}: schema must be a JSON object"
            )));
        }
        if let Some(rl) = &self.rate_limit {
            rl.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(rename = "type")]
    pub kind: TransportKind,
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self, id: &str) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::Validation(format!(
                "systems.{id}: transport.endpoint must not be empty"
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(format!(
                "systems.{id}: transport.timeout_secs must be nonzero"
            )));
        }
        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    30
}

/// `{external_field: internal_field}` tables for both directions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default, rename = "in")]
    pub inbound: BTreeMap<String, String>,
    #[serde(default, rename = "out")]
    pub outbound: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
