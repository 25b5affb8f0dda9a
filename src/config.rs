//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MIMESHELL_CONFIG` (environment variable)
//! 2. `~/.config/mimeshell/config.toml` (Linux/macOS)
//!    `%APPDATA%\mimeshell\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MimeError, Result};
use crate::export::attachment::FilenameStrategy;
use crate::parser::session::ParserConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Parser settings.
    pub parser: ParserConfig,
    /// Attachment saving defaults.
    pub attachments: AttachmentsConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
}

/// Attachment saving defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentsConfig {
    /// Collision handling: "DuplicateThrow", "DuplicateSuffix", "RandomFilename".
    pub strategy: FilenameStrategy,
    /// Also save inline resources.
    pub include_inline: bool,
    /// Default output directory.
    pub output_dir: Option<PathBuf>,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            cache_dir: None,
        }
    }
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            strategy: FilenameStrategy::DuplicateSuffix,
            include_inline: true,
            output_dir: None,
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Falls back to the defaults when no file exists or it cannot be used.
pub fn load_config() -> Config {
    let Some(path) = config_file_path().filter(|p| p.exists()) else {
        return Config::default();
    };
    match read_config_file(&path) {
        Ok(cfg) => {
            tracing::info!(path = %path.display(), "Loaded config");
            cfg
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring config, using defaults");
            Config::default()
        }
    }
}

/// Read and parse one TOML config file.
pub fn read_config_file(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| MimeError::io(path, e))?;
    toml::from_str(&contents)
        .map_err(|e| MimeError::Configuration(format!("{}: {e}", path.display())))
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MIMESHELL_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mimeshell").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mimeshell")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mimeshell.log")
}
