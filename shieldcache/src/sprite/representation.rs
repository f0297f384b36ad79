//! Shield requests and resolved shield images.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::metadata::SpriteInfo;
use super::ResolveError;

/// A road shield as described by a route instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldRepresentation {
    /// Base URL of the shield artwork.
    pub base_url: String,
    /// Shield family, e.g. `us-interstate` or `circle-white`.
    pub name: String,
    /// Suggested text color.
    pub text_color: String,
    /// Text printed on the shield, e.g. `101`.
    #[serde(rename = "display_ref")]
    pub text: String,
}

impl ShieldRepresentation {
    /// Sprite icon name: the shield name suffixed with the text length,
    /// never less than 2 (`us-interstate-3` for `101`).
    pub fn icon_name(&self) -> String {
        format!("{}-{}", self.name, self.text.chars().count().max(2))
    }
}

/// Everything an instruction component says about its image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRepresentation {
    /// Base URL of the legacy standalone shield image, without the scale
    /// and format suffix.
    pub image_base_url: Option<String>,
    /// Sprite shield description.
    pub shield: Option<ShieldRepresentation>,
}

impl ImageRepresentation {
    /// Whether there is any image source to try.
    pub fn has_image_source(&self) -> bool {
        self.image_base_url.is_some() || self.shield.is_some()
    }
}

/// How to render one road shield.
#[derive(Debug, Clone, PartialEq)]
pub enum ShieldImage {
    /// A region of a cached sprite sheet.
    Sprite {
        /// Cache key (URL) of the sprite sheet image.
        sprite_url: String,
        icon: String,
        info: SpriteInfo,
    },
    /// A standalone image from the legacy endpoint.
    Legacy { url: String, data: Bytes },
    /// No image; draw a placeholder. `error` is the last failure when
    /// sources were tried, `None` when there was nothing to try.
    Generic { error: Option<ResolveError> },
}

impl ShieldImage {
    pub fn is_sprite(&self) -> bool {
        matches!(self, ShieldImage::Sprite { .. })
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, ShieldImage::Legacy { .. })
    }

    pub fn is_generic(&self) -> bool {
        matches!(self, ShieldImage::Generic { .. })
    }
}
