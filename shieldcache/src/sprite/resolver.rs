//! The shield resolution policy.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::metadata::{MetadataCache, SpriteMetadata};
use super::region::crop_region;
use super::representation::{ImageRepresentation, ShieldImage, ShieldRepresentation};
use super::{ResolveError, SpriteError};
use crate::cache::{BlobCache, DerivedArtifact, DerivedCache, StoragePolicy};
use crate::config::ResolverConfig;
use crate::download::{DownloadCoordinator, FetchError};

/// Resource keys of one style's sprite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpriteUrls {
    /// Metadata JSON: `{base}/{style}/sprite@{scale}x`.
    pub metadata: String,
    /// Sheet image: `{base}/{style}/sprite@{scale}x.png`.
    pub image: String,
}

#[derive(Clone, Copy)]
enum Source<'a> {
    Sprite(&'a ShieldRepresentation),
    Legacy(&'a str),
}

struct Inner {
    coordinator: Arc<DownloadCoordinator>,
    blobs: Arc<BlobCache>,
    derived: Arc<DerivedCache>,
    metadata: MetadataCache,
    config: ResolverConfig,
    style_id: RwLock<String>,
}

/// Resolves road shields to sprite regions, legacy images or a generic
/// placeholder.
///
/// Cheap to clone; clones share caches and the active style.
#[derive(Clone)]
pub struct SpriteResolver {
    inner: Arc<Inner>,
}

impl SpriteResolver {
    pub fn new(
        coordinator: Arc<DownloadCoordinator>,
        blobs: Arc<BlobCache>,
        derived: Arc<DerivedCache>,
        config: ResolverConfig,
    ) -> Self {
        let style_id = RwLock::new(config.style_id.clone());
        Self {
            inner: Arc::new(Inner {
                coordinator,
                blobs,
                derived,
                metadata: MetadataCache::default(),
                config,
                style_id,
            }),
        }
    }

    /// The active style id.
    pub fn style_id(&self) -> String {
        self.inner.style_id.read().clone()
    }

    /// Sprite keys for the active style.
    pub fn sprite_urls(&self) -> SpriteUrls {
        self.sprite_urls_for(&self.inner.style_id.read())
    }

    /// Sprite keys for `style_id`.
    pub fn sprite_urls_for(&self, style_id: &str) -> SpriteUrls {
        let config = &self.inner.config;
        let base = format!(
            "{}/{}/sprite@{}x",
            config.sprite_base_url.trim_end_matches('/'),
            style_id,
            config.scale
        );
        let query = config
            .access_token
            .as_deref()
            .map(|token| format!("?access_token={}", token))
            .unwrap_or_default();

        SpriteUrls {
            metadata: format!("{}{}", base, query),
            image: format!("{}.png{}", base, query),
        }
    }

    /// Blob cache key of the legacy image for `image_base_url`.
    pub fn legacy_url(&self, image_base_url: &str) -> String {
        format!("{}@{}x.png", image_base_url, self.inner.config.scale)
    }

    /// Derived cache key of the image cropped for `icon` out of the sheet at
    /// `sprite_url`.
    pub fn derived_key(sprite_url: &str, icon: &str) -> String {
        format!("{}-{}", sprite_url, icon)
    }

    pub fn coordinator(&self) -> &Arc<DownloadCoordinator> {
        &self.inner.coordinator
    }

    pub fn blob_cache(&self) -> &Arc<BlobCache> {
        &self.inner.blobs
    }

    pub fn derived_cache(&self) -> &Arc<DerivedCache> {
        &self.inner.derived
    }

    /// Number of parsed sprite metadata documents held in memory.
    pub fn metadata_entries(&self) -> usize {
        self.inner.metadata.len()
    }

    fn is_legacy_first(&self, name: &str) -> bool {
        self.inner
            .config
            .legacy_first_shields
            .iter()
            .any(|candidate| candidate == name)
    }

    /// Sources that apply to `representation`, in the order to try them.
    fn sources<'a>(&self, representation: &'a ImageRepresentation) -> Vec<Source<'a>> {
        let sprite = representation.shield.as_ref().map(Source::Sprite);
        let legacy = representation.image_base_url.as_deref().map(Source::Legacy);
        let legacy_first = representation
            .shield
            .as_ref()
            .is_some_and(|shield| self.is_legacy_first(&shield.name));

        let ordered = if legacy_first {
            [legacy, sprite]
        } else {
            [sprite, legacy]
        };
        ordered.into_iter().flatten().collect()
    }

    /// Resolve `representation`, fetching whatever is not cached yet.
    ///
    /// Always produces a [`ShieldImage`]; failures of a source only show up
    /// in [`ShieldImage::Generic`] when no source succeeded.
    pub async fn resolve(&self, representation: &ImageRepresentation) -> ShieldImage {
        let mut last_error = None;

        for source in self.sources(representation) {
            match self.try_source(source).await {
                Ok(Some(image)) => return image,
                Ok(None) => {}
                Err(e) => {
                    debug!(error = %e, "Shield source failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        ShieldImage::Generic { error: last_error }
    }

    /// Memory-only lookup; never touches disk or the network.
    pub fn cached(&self, representation: &ImageRepresentation) -> Option<ShieldImage> {
        self.sources(representation)
            .into_iter()
            .find_map(|source| match source {
                Source::Sprite(shield) => {
                    let urls = self.sprite_urls();
                    let metadata = self.inner.metadata.get(&urls.metadata)?;
                    let icon = shield.icon_name();
                    let info = metadata.get(&icon)?.clone();
                    self.inner
                        .blobs
                        .contains_in_memory(&urls.image)
                        .then(|| ShieldImage::Sprite {
                            sprite_url: urls.image,
                            icon,
                            info,
                        })
                }
                Source::Legacy(base) => {
                    let url = self.legacy_url(base);
                    let data = self.inner.blobs.read_memory(&url)?;
                    Some(ShieldImage::Legacy { url, data })
                }
            })
    }

    /// Prefetch every source of `representation` in the background and
    /// report the last error, if any.
    ///
    /// `completion` runs on a runtime thread.
    pub fn update_representation<F>(&self, representation: ImageRepresentation, completion: F)
    where
        F: FnOnce(Option<ResolveError>) + Send + 'static,
    {
        let resolver = self.clone();
        self.inner.coordinator.runtime().spawn(async move {
            let mut last_error = None;
            for source in resolver.sources(&representation) {
                if let Err(e) = resolver.try_source(source).await {
                    last_error = Some(e);
                }
            }
            completion(last_error);
        });
    }

    /// Image bytes for a resolved shield.
    ///
    /// Sprite regions are cropped out of the sheet once and kept in the
    /// derived cache. Generic shields have no bytes.
    pub async fn shield_image(&self, image: &ShieldImage) -> Option<Bytes> {
        match image {
            ShieldImage::Sprite {
                sprite_url,
                icon,
                info,
            } => {
                let key = Self::derived_key(sprite_url, icon);
                if let Some(artifact) = self.inner.derived.artifact(&key).await {
                    return Some(artifact.into_bytes());
                }

                // Sheets of a replaced style are not fetched again.
                let style = self.style_id();
                if self.sprite_urls_for(&style).image != *sprite_url {
                    debug!(url = %sprite_url, "Sprite sheet belongs to an inactive style");
                    return None;
                }

                let sheet = match self.fetch_blob(sprite_url, Some(&style)).await {
                    Ok(sheet) => sheet,
                    Err(e) => {
                        debug!(url = %sprite_url, error = %e, "Sprite sheet unavailable");
                        return None;
                    }
                };

                let (icon_name, region) = (icon.clone(), info.clone());
                let cropped =
                    tokio::task::spawn_blocking(move || crop_region(&sheet, &icon_name, &region))
                        .await
                        .map_err(|e| SpriteError::Image(e.to_string()))
                        .and_then(|result| result);

                match cropped {
                    Ok(png) => {
                        self.insert_for_style(&style, || {
                            drop(self.inner.derived.store(
                                &key,
                                DerivedArtifact::new(png.clone()),
                                StoragePolicy::MemoryAndDisk,
                            ))
                        });
                        Some(png)
                    }
                    Err(e) => {
                        warn!(icon = %icon, error = %e, "Failed to crop shield from sprite sheet");
                        None
                    }
                }
            }
            ShieldImage::Legacy { data, .. } => Some(data.clone()),
            ShieldImage::Generic { .. } => None,
        }
    }

    /// Switch the active style.
    ///
    /// Drops the previous style's sprite sheet and metadata and cancels
    /// their in-flight fetches. Legacy images are style independent and
    /// stay cached. Returns `false` if `style_id` was already active.
    pub async fn set_style(&self, style_id: &str) -> bool {
        let previous = {
            let mut current = self.inner.style_id.write();
            if *current == style_id {
                return false;
            }
            std::mem::replace(&mut *current, style_id.to_string())
        };

        let old = self.sprite_urls_for(&previous);
        self.inner.coordinator.cancel(&old.metadata);
        self.inner.coordinator.cancel(&old.image);
        self.inner.metadata.remove(&old.metadata);
        self.inner.blobs.remove(&old.image).await;

        info!(from = %previous, to = %style_id, "Sprite style changed");
        true
    }

    /// Clear the blob, derived and metadata caches and cancel every
    /// in-flight fetch.
    pub async fn reset_cache(&self) {
        let cancelled = self.inner.coordinator.cancel_all();
        self.inner.metadata.clear();
        self.inner.blobs.clear_memory();
        self.inner.blobs.clear_disk().await;
        self.inner.derived.clear().await;
        info!(cancelled, "Shield caches reset");
    }

    async fn try_source(&self, source: Source<'_>) -> Result<Option<ShieldImage>, ResolveError> {
        match source {
            Source::Sprite(shield) => self.sprite_image(shield).await,
            Source::Legacy(base) => {
                let url = self.legacy_url(base);
                let data = self.fetch_blob(&url, None).await?;
                Ok(Some(ShieldImage::Legacy { url, data }))
            }
        }
    }

    /// The sprite region for `shield`, or `None` when the active style's
    /// sprite has no icon for it.
    async fn sprite_image(&self, shield: &ShieldRepresentation) -> Result<Option<ShieldImage>, ResolveError> {
        let style = self.style_id();
        let urls = self.sprite_urls_for(&style);

        // Independent keys; both coalesce with concurrent resolutions.
        let (metadata, sheet) = futures::join!(
            self.sprite_metadata(&urls.metadata, &style),
            self.fetch_blob(&urls.image, Some(&style))
        );
        let metadata = metadata?;
        sheet?;

        let icon = shield.icon_name();
        match metadata.get(&icon) {
            Some(info) => Ok(Some(ShieldImage::Sprite {
                sprite_url: urls.image,
                icon,
                info: info.clone(),
            })),
            None => {
                debug!(icon = %icon, "Icon missing from sprite metadata");
                Ok(None)
            }
        }
    }

    async fn sprite_metadata(
        &self,
        url: &str,
        style: &str,
    ) -> Result<Arc<SpriteMetadata>, ResolveError> {
        if let Some(metadata) = self.inner.metadata.get(url) {
            return Ok(metadata);
        }

        let download = self.inner.coordinator.fetch_async(url).await?;
        let metadata = Arc::new(SpriteMetadata::parse(url, &download.data)?);
        let inserted =
            self.insert_for_style(style, || self.inner.metadata.insert(url, Arc::clone(&metadata)));
        if inserted {
            debug!(url = %url, icons = metadata.len(), "Sprite metadata cached");
        }
        Ok(metadata)
    }

    /// Read `key` from the blob cache, downloading and storing it on a miss.
    ///
    /// Keys bound to `style` are only stored while that style is active.
    async fn fetch_blob(&self, key: &str, style: Option<&str>) -> Result<Bytes, FetchError> {
        if let Some(data) = self.inner.blobs.read(key).await {
            return Ok(data);
        }

        let download = self.inner.coordinator.fetch_async(key).await?;
        // The disk write finishes in the background.
        let store = || {
            drop(
                self.inner
                    .blobs
                    .store(key, download.data.clone(), StoragePolicy::MemoryAndDisk),
            )
        };
        match style {
            Some(style) => {
                self.insert_for_style(style, store);
            }
            None => store(),
        }
        Ok(download.data)
    }

    /// Run `insert` only if `style` is still active.
    ///
    /// The style lock is held across `insert`, so a concurrent
    /// [`set_style`](Self::set_style) either sees the entry and drops it or
    /// prevents it from being added.
    fn insert_for_style(&self, style: &str, insert: impl FnOnce()) -> bool {
        let current = self.inner.style_id.read();
        if *current != style {
            debug!(style = %style, active = %*current, "Skipping cache insert for inactive style");
            return false;
        }
        insert();
        true
    }
}

impl fmt::Debug for SpriteResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpriteResolver")
            .field("style_id", &self.style_id())
            .field("scale", &self.inner.config.scale)
            .field("metadata_entries", &self.metadata_entries())
            .finish()
    }
}
