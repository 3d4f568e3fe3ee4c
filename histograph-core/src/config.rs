//! Layered configuration using figment.
//!
//! Resolution order (highest priority last):
//! 1. Built-in defaults
//! 2. Config file: `~/.config/histograph/config.toml`, or the path given with
//!    `--config` (which must exist)
//! 3. Environment variables: `HISTOGRAPH_*` (e.g. `HISTOGRAPH_BACKEND_URL`)
//!
//! Command-line flags are applied on top by the binary.
//!
//! ```toml
//! backend_url = "http://localhost:5000/api"
//! timeout_secs = 10
//! poll_interval_ms = 2000
//! log_file = "~/.cache/histograph/histograph.log"
//! ```

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use histograph_client::backend::DEFAULT_BACKEND_URL;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "~/.config/histograph/config.toml";
pub const DEFAULT_LOG_FILE: &str = "~/.cache/histograph/histograph.log";
pub const ENV_PREFIX: &str = "HISTOGRAPH_";

#[derive(Error, Debug)]
pub enum ConfigError {
    /// Boxed to keep `Result<Config, ConfigError>` small.
    #[error(transparent)]
    Figment(Box<figment::Error>),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the extraction backend API.
    pub backend_url: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Interval between extraction status checks.
    pub poll_interval_ms: u64,
    /// Where logs go while a terminal UI owns the screen. `~` is expanded.
    pub log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            timeout_secs: 10,
            poll_interval_ms: 2000,
            log_file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

/// Expand `~` and environment variables in a user-supplied path.
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

pub fn default_path() -> PathBuf {
    expand_path(DEFAULT_CONFIG_PATH)
}

impl Config {
    /// Load with layered resolution (defaults → file → env).
    ///
    /// An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(raw) => {
                let file = expand_path(raw);
                if !file.is_file() {
                    return Err(ConfigError::NotFound(file));
                }
                file
            }
            None => default_path(),
        };

        Self::from_figment(Self::figment(file).merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Defaults layered under a TOML file. A missing file contributes nothing.
    pub fn figment(file: PathBuf) -> Figment {
        Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(file))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.backend_url).map_err(|e| ConfigError::Invalid {
            key: "backend_url",
            reason: format!("'{}': {}", self.backend_url, e),
        })?;
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "timeout_secs",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "poll_interval_ms",
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn log_path(&self) -> PathBuf {
        expand_path(&self.log_file)
    }
}
