//! Configuration types for shieldcache components.
//!
//! Each component receives its own configuration struct:
//!
//! - [`CacheConfig`] for the two-tier blob cache and the derived cache
//! - [`DownloaderConfig`] for the download coordinator and HTTP transport
//! - [`ResolverConfig`] for sprite and shield resolution
//!
//! [`ConfigFile`] groups all three and can be loaded from an INI file.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use shieldcache::config::{CacheConfig, DownloaderConfig};
//!
//! let cache = CacheConfig::new("/tmp/shieldcache").with_memory_capacity(8 * 1024 * 1024);
//! let download = DownloaderConfig::default().with_request_timeout(Duration::from_secs(5));
//! assert_eq!(cache.memory_capacity_bytes, 8 * 1024 * 1024);
//! assert_eq!(download.request_timeout, Duration::from_secs(5));
//! ```

mod file;
mod settings;
mod size;

pub use file::{config_directory, config_file_path, ConfigFile, ConfigFileError};
pub use settings::{
    CacheConfig, DownloaderConfig, ResolverConfig, DEFAULT_MEMORY_CAPACITY_BYTES,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SPRITE_BASE_URL, DEFAULT_STYLE_ID, DEFAULT_USER_AGENT,
};
pub use size::{format_size, parse_size, SizeParseError};
