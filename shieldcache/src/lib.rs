//! shieldcache - road shield and sprite fetching with a two-tier cache
//!
//! This library downloads road-shield images, sprite sheets and sprite
//! metadata, keeps at most one network operation in flight per resource,
//! and caches the results in memory and on disk.
//!
//! # Components
//!
//! - [`key`] - stable, filesystem-safe cache keys
//! - [`cache`] - the two-tier [`BlobCache`] and the [`DerivedCache`]
//! - [`pressure`] - the low-memory signal caches subscribe to
//! - [`transport`] - the network boundary ([`HttpTransport`], [`StubTransport`])
//! - [`download`] - the coalescing [`DownloadCoordinator`]
//! - [`sprite`] - the [`SpriteResolver`] shield policy
//! - [`config`] - settings and INI file loading
//! - [`logging`] - optional subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shieldcache::config::ConfigFile;
//! use shieldcache::{
//!     BlobCache, DerivedCache, DownloadCoordinator, HttpTransport, ImageRepresentation,
//!     MemoryPressure, SpriteResolver,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigFile::load()?;
//! let pressure = MemoryPressure::new();
//!
//! let transport = Arc::new(HttpTransport::new(&config.download)?);
//! let coordinator = Arc::new(DownloadCoordinator::new(
//!     transport,
//!     config.download.clone(),
//!     tokio::runtime::Handle::current(),
//! ));
//! let blobs = BlobCache::new(config.cache.clone(), &pressure)?;
//! let derived = Arc::new(DerivedCache::new(&config.cache, &pressure)?);
//! let resolver = SpriteResolver::new(coordinator, blobs, derived, config.sprite.clone());
//!
//! let shield = resolver.resolve(&ImageRepresentation::default()).await;
//! assert!(shield.is_generic());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod download;
pub mod key;
pub mod logging;
pub mod pressure;
pub mod sprite;
pub mod transport;

pub use cache::{BlobCache, CacheError, DerivedArtifact, DerivedCache, PendingWrite, StoragePolicy};
pub use download::{Download, DownloadCoordinator, FetchError, OperationHandle};
pub use key::derive_key;
pub use pressure::{MemoryPressure, Subscription};
pub use sprite::{ImageRepresentation, ResolveError, ShieldImage, ShieldRepresentation, SpriteResolver};
pub use transport::{HttpTransport, StubTransport, Transport, TransportError};
