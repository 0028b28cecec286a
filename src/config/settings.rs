//! Application settings

use crate::core::capture::{CaptureRequest, DEFAULT_WINDOW_MS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Settings file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// Reading or writing the file failed
    #[error("Config I/O error on {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`AppConfig`]
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Serializing the settings failed
    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Port used when none is given on the command line
    pub default_port: Option<String>,
    /// Capture defaults
    pub capture: CaptureSettings,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Default settings file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        super::config_dir()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load config from the default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load config from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)
    }
}

/// Capture defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Listening window in milliseconds
    pub duration_ms: u64,
    /// Append CR-LF to text payloads
    pub append_crlf: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            duration_ms: DEFAULT_WINDOW_MS,
            append_crlf: true,
        }
    }
}

impl CaptureSettings {
    /// Build a text request with these defaults
    pub fn text_request(&self, message: &str) -> CaptureRequest {
        CaptureRequest::text(message, self.duration_ms, self.append_crlf)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level filter (`error`, `warn`, `info`, `debug`, `trace`)
    pub level: String,
    /// Emit JSON lines instead of plain text
    pub json: bool,
    /// Also write a daily rolling log file
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: false,
        }
    }
}
