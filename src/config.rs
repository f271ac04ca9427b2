//! Configuration loading and validation.
//!
//! Loads `config.toml` from `$COURIER_CONFIG_PATH` or `~/.courier/config.toml`.
//! Environment variables override file values; file values override defaults.
//! A missing file is not an error.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Smallest accepted pause between two initiated sends, in milliseconds.
pub const MIN_SENDING_INTERVAL_MS: u64 = 100;

/// Default pause between two initiated sends, in milliseconds.
pub const DEFAULT_SENDING_INTERVAL_MS: u64 = 1_800;

/// Env var naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "COURIER_CONFIG_PATH";

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `sending_interval_ms` is below the platform floor.
    #[error("sending_interval_ms must be at least {min}, got {got}")]
    IntervalTooShort {
        /// Configured value.
        got: u64,
        /// Required minimum.
        min: u64,
    },
    /// An unknown dispatch mode name.
    #[error("unknown dispatch mode '{0}', expected 'queued' or 'direct'")]
    UnknownMode(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Outbound dispatch settings.
    pub dispatch: DispatchConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// How outgoing messages reach the API client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Coalesce, throttle and gate through the pending queue.
    #[default]
    Queued,
    /// Send immediately, bypassing the queue. For community tokens whose
    /// limits are enforced elsewhere.
    Direct,
}

impl FromStr for DispatchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "direct" => Ok(Self::Direct),
            other => Err(ConfigError::UnknownMode(other.to_owned())),
        }
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Minimum milliseconds between two initiated sends.
    pub sending_interval_ms: u64,
    /// Queued or direct delivery.
    pub mode: DispatchMode,
}

impl DispatchConfig {
    /// The sending interval as a [`Duration`].
    pub fn sending_interval(&self) -> Duration {
        Duration::from_millis(self.sending_interval_ms)
    }

    /// Check the interval floor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IntervalTooShort`] below
    /// [`MIN_SENDING_INTERVAL_MS`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sending_interval_ms < MIN_SENDING_INTERVAL_MS {
            return Err(ConfigError::IntervalTooShort {
                got: self.sending_interval_ms,
                min: MIN_SENDING_INTERVAL_MS,
            });
        }
        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            sending_interval_ms: DEFAULT_SENDING_INTERVAL_MS,
            mode: DispatchMode::Queued,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for rotated JSON logs. Console-only when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            logs_dir: None,
        }
    }
}

impl Config {
    /// Load with precedence env vars > file > defaults, then validate.
    ///
    /// `path` wins over `$COURIER_CONFIG_PATH`, which wins over
    /// `~/.courier/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(|key| std::env::var(key).ok())?,
        };
        let mut config = Self::load_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.dispatch.validate()?;
        Ok(config)
    }

    /// Load a file, falling back to defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            )),
        }
    }

    /// Parse a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML or mistyped fields.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Apply environment overrides through `env`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("COURIER_SENDING_INTERVAL_MS") {
            match v.parse() {
                Ok(n) => self.dispatch.sending_interval_ms = n,
                Err(_) => tracing::warn!(
                    var = "COURIER_SENDING_INTERVAL_MS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("COURIER_DISPATCH_MODE") {
            match v.parse() {
                Ok(mode) => self.dispatch.mode = mode,
                Err(e) => tracing::warn!(
                    var = "COURIER_DISPATCH_MODE",
                    error = %e,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("COURIER_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("COURIER_LOGS_DIR") {
            self.logging.logs_dir = Some(PathBuf::from(v));
        }
    }
}

/// Resolve the default config directory (`~/.courier/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".courier"))
}

/// Resolve the config file path using a custom env resolver.
///
/// # Errors
///
/// Returns an error if no override is set and the home directory is unknown.
pub fn default_config_path(env: impl Fn(&str) -> Option<String>) -> anyhow::Result<PathBuf> {
    if let Some(p) = env(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(p));
    }
    Ok(config_dir()?.join("config.toml"))
}
