//! INI configuration file handling.
//!
//! Loads `~/.shieldcache/config.ini` (or any given path) on top of the
//! built-in defaults. Missing files and missing keys fall back to defaults;
//! present but malformed values are rejected with the offending section and
//! key named in the error.
//!
//! ```ini
//! [cache]
//! directory = ~/.cache/shieldcache
//! memory_size = 64MB
//! memory_ttl_secs = 600
//!
//! [download]
//! timeout_secs = 30
//! user_agent = my-app/1.0
//!
//! [sprite]
//! base_url = https://api.mapbox.com/styles/v1
//! style_id = mapbox/navigation-day-v1
//! scale = 2
//! access_token = pk.xxx
//! legacy_first = circle-white, rectangle-white
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use super::settings::{CacheConfig, DownloaderConfig, ResolverConfig};
use super::size::parse_size;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read or parse the INI file.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value.
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// All settings, as loaded from a configuration file.
#[derive(Clone, Debug, Default)]
pub struct ConfigFile {
    /// Blob cache settings (the derived cache nests inside it).
    pub cache: CacheConfig,
    /// Download coordinator settings.
    pub download: DownloaderConfig,
    /// Sprite resolver settings.
    pub sprite: ResolverConfig,
}

impl ConfigFile {
    /// Load configuration from the default path (`~/.shieldcache/config.ini`).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        parse_ini(&ini)
    }

    /// Parse configuration from INI text.
    pub fn from_ini_str(content: &str) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_str(content)
            .map_err(|e| ConfigFileError::ReadError(ini::Error::Parse(e)))?;
        parse_ini(&ini)
    }
}

/// Get the path to the config directory (`~/.shieldcache`).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".shieldcache")
}

/// Get the path to the config file (`~/.shieldcache/config.ini`).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

fn invalid(section: &str, key: &str, value: &str, reason: impl Into<String>) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_secs(section: &str, key: &str, value: &str) -> Result<Duration, ConfigFileError> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err(invalid(section, key, value, "must be greater than zero")),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(_) => Err(invalid(section, key, value, "expected a whole number of seconds")),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Overlay INI values onto `ConfigFile::default()`.
fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.cache.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("memory_size") {
            config.cache.memory_capacity_bytes =
                parse_size(v).map_err(|e| invalid("cache", "memory_size", v, e.to_string()))?;
        }
        if let Some(v) = section.get("memory_ttl_secs") {
            config.cache.memory_ttl = Some(parse_secs("cache", "memory_ttl_secs", v)?);
        }
    }

    // [download] section
    if let Some(section) = ini.section(Some("download")) {
        if let Some(v) = section.get("timeout_secs") {
            config.download.request_timeout = parse_secs("download", "timeout_secs", v)?;
        }
        if let Some(v) = section.get("user_agent") {
            let v = v.trim();
            if v.is_empty() {
                return Err(invalid("download", "user_agent", v, "must not be empty"));
            }
            config.download.user_agent = v.to_string();
        }
    }

    // [sprite] section
    if let Some(section) = ini.section(Some("sprite")) {
        if let Some(v) = section.get("base_url") {
            let v = v.trim().trim_end_matches('/');
            if reqwest::Url::parse(v).is_err() {
                return Err(invalid("sprite", "base_url", v, "must be an absolute URL"));
            }
            config.sprite.sprite_base_url = v.to_string();
        }
        if let Some(v) = section.get("style_id") {
            let v = v.trim();
            if v.is_empty() {
                return Err(invalid("sprite", "style_id", v, "must not be empty"));
            }
            config.sprite.style_id = v.to_string();
        }
        if let Some(v) = section.get("scale") {
            match v.trim().parse::<u8>() {
                Ok(scale @ 1..=3) => config.sprite.scale = scale,
                _ => return Err(invalid("sprite", "scale", v, "must be 1, 2 or 3")),
            }
        }
        if let Some(v) = section.get("access_token") {
            let v = v.trim();
            if !v.is_empty() {
                config.sprite.access_token = Some(v.to_string());
            }
        }
        if let Some(v) = section.get("legacy_first") {
            config.sprite.legacy_first_shields = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    Ok(config)
}
