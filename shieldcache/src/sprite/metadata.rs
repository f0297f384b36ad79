//! Sprite sheet metadata: the JSON index of named regions.
//!
//! ```json
//! {
//!   "default-3": { "x": 0, "y": 0, "width": 78, "height": 48, "pixelRatio": 2, "visible": true },
//!   "circle-white-2": { "x": 78, "y": 0, "width": 48, "height": 48, "pixelRatio": 2,
//!                       "placeholder": [0, 4, 24, 20], "visible": true }
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::SpriteError;
use crate::key::derive_key;

fn default_visible() -> bool {
    true
}

fn default_pixel_ratio() -> f64 {
    1.0
}

/// One named region of a sprite sheet, in sheet pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpriteInfo {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_pixel_ratio")]
    pub pixel_ratio: f64,
    /// Area reserved for the shield text: `[left, top, right, bottom]`.
    #[serde(default)]
    pub placeholder: [f64; 4],
    #[serde(default = "default_visible")]
    pub visible: bool,
}

/// Parsed sprite metadata, icon name to region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpriteMetadata {
    icons: HashMap<String, SpriteInfo>,
}

impl SpriteMetadata {
    /// Parse the metadata JSON fetched from `url`.
    pub fn parse(url: &str, data: &[u8]) -> Result<Self, SpriteError> {
        let icons = serde_json::from_slice(data).map_err(|e| SpriteError::Metadata {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { icons })
    }

    pub fn get(&self, icon: &str) -> Option<&SpriteInfo> {
        self.icons.get(icon)
    }

    pub fn len(&self) -> usize {
        self.icons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.icons.is_empty()
    }
}

impl FromIterator<(String, SpriteInfo)> for SpriteMetadata {
    fn from_iter<I: IntoIterator<Item = (String, SpriteInfo)>>(iter: I) -> Self {
        Self {
            icons: iter.into_iter().collect(),
        }
    }
}

/// In-memory store of parsed metadata, keyed by the derived key of the
/// metadata URL.
#[derive(Debug, Default)]
pub(crate) struct MetadataCache {
    entries: RwLock<HashMap<String, Arc<SpriteMetadata>>>,
}

impl MetadataCache {
    pub(crate) fn get(&self, url: &str) -> Option<Arc<SpriteMetadata>> {
        self.entries.read().get(&derive_key(url)).cloned()
    }

    pub(crate) fn insert(&self, url: &str, metadata: Arc<SpriteMetadata>) {
        self.entries.write().insert(derive_key(url), metadata);
    }

    pub(crate) fn remove(&self, url: &str) -> bool {
        self.entries.write().remove(&derive_key(url)).is_some()
    }

    pub(crate) fn clear(&self) {
        self.entries.write().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}
