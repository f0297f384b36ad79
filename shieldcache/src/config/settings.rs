//! Configuration structs and their defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Default in-memory capacity for each cache instance (64 MB).
pub const DEFAULT_MEMORY_CAPACITY_BYTES: u64 = 64 * 1024 * 1024;

/// Default per-operation transport timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default User-Agent sent with every HTTP request.
pub const DEFAULT_USER_AGENT: &str = concat!("shieldcache/", env!("CARGO_PKG_VERSION"));

/// Default base URL for style sprites.
pub const DEFAULT_SPRITE_BASE_URL: &str = "https://api.mapbox.com/styles/v1";

/// Default style identifier.
pub const DEFAULT_STYLE_ID: &str = "mapbox/navigation-day-v1";

/// Shield names that prefer the legacy image over the sprite by default.
///
/// `circle-white` is the US state road shield; its sprite icon carries no
/// state-specific artwork.
const DEFAULT_LEGACY_FIRST_SHIELDS: &[&str] = &["circle-white"];

/// Configuration for a [`BlobCache`](crate::cache::BlobCache).
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Directory holding the disk tier, one file per entry.
    pub directory: PathBuf,

    /// Maximum total size of the memory tier in bytes.
    pub memory_capacity_bytes: u64,

    /// Optional time-to-live for memory entries.
    pub memory_ttl: Option<Duration>,
}

impl CacheConfig {
    /// Create a cache config rooted at `directory` with default limits.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            memory_capacity_bytes: DEFAULT_MEMORY_CAPACITY_BYTES,
            memory_ttl: None,
        }
    }

    /// Set the memory tier capacity.
    pub fn with_memory_capacity(mut self, bytes: u64) -> Self {
        self.memory_capacity_bytes = bytes;
        self
    }

    /// Set a time-to-live for memory entries.
    pub fn with_memory_ttl(mut self, ttl: Duration) -> Self {
        self.memory_ttl = Some(ttl);
        self
    }

    /// Config for a nested cache living in `directory/<name>`.
    ///
    /// Used to give the derived-artifact cache its own disk tier.
    pub fn nested(&self, name: &str) -> Self {
        Self {
            directory: self.directory.join(name),
            ..self.clone()
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let directory = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("shieldcache");
        Self::new(directory)
    }
}

/// Configuration for the [`DownloadCoordinator`](crate::download::DownloadCoordinator)
/// and the HTTP transport.
#[derive(Clone, Debug)]
pub struct DownloaderConfig {
    /// Timeout applied to each in-flight operation.
    pub request_timeout: Duration,

    /// User-Agent header for HTTP requests.
    pub user_agent: String,

    /// Extra headers attached to every request.
    pub headers: Vec<(String, String)>,
}

impl DownloaderConfig {
    /// Set the per-operation timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the User-Agent header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: Vec::new(),
        }
    }
}

/// Configuration for the [`SpriteResolver`](crate::sprite::SpriteResolver).
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// Base URL that sprite paths are appended to.
    pub sprite_base_url: String,

    /// Active style identifier, e.g. `mapbox/navigation-day-v1`.
    pub style_id: String,

    /// Requested pixel ratio (1, 2 or 3).
    pub scale: u8,

    /// Access token appended to sprite URLs when present.
    pub access_token: Option<String>,

    /// Shield names resolved from the legacy image before the sprite.
    pub legacy_first_shields: Vec<String>,
}

impl ResolverConfig {
    /// Set the active style.
    pub fn with_style_id(mut self, style_id: impl Into<String>) -> Self {
        self.style_id = style_id.into();
        self
    }

    /// Set the sprite base URL.
    pub fn with_sprite_base_url(mut self, url: impl Into<String>) -> Self {
        self.sprite_base_url = url.into();
        self
    }

    /// Set the pixel ratio. Values below 1 are raised to 1.
    pub fn with_scale(mut self, scale: u8) -> Self {
        self.scale = scale.max(1);
        self
    }

    /// Set the access token.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Replace the set of legacy-first shield names.
    pub fn with_legacy_first_shields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.legacy_first_shields = names.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            sprite_base_url: DEFAULT_SPRITE_BASE_URL.to_string(),
            style_id: DEFAULT_STYLE_ID.to_string(),
            scale: 2,
            access_token: None,
            legacy_first_shields: DEFAULT_LEGACY_FIRST_SHIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
