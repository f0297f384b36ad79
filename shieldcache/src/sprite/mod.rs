//! Road shield resolution across sprite sheet, legacy image and generic
//! placeholder sources.
//!
//! [`SpriteResolver`] answers "how do I draw this shield?" with a
//! [`ShieldImage`], trying the sources in priority order:
//!
//! 1. **Sprite** - the active style's sprite sheet plus its metadata, both
//!    fetched once per style through the download coordinator;
//! 2. **Legacy** - a standalone image at `{image_base_url}@{scale}x.png`;
//! 3. **Generic** - no image, with the last failure attached.
//!
//! Shield names configured as legacy-first (by default `circle-white`, the
//! US state road shield) swap steps 1 and 2.

mod metadata;
mod region;
mod representation;
mod resolver;

pub use metadata::{SpriteInfo, SpriteMetadata};
pub use region::crop_region;
pub use representation::{ImageRepresentation, ShieldImage, ShieldRepresentation};
pub use resolver::{SpriteResolver, SpriteUrls};

use thiserror::Error;

use crate::download::FetchError;

/// Failures processing sprite data after it was fetched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpriteError {
    /// The metadata JSON could not be parsed.
    #[error("Invalid sprite metadata from {url}: {reason}")]
    Metadata { url: String, reason: String },

    /// The sprite sheet could not be decoded or a region re-encoded.
    #[error("Sprite image error: {0}")]
    Image(String),

    /// The metadata points outside the sheet.
    #[error("Sprite region '{icon}' lies outside the {sheet_width}x{sheet_height} sheet")]
    RegionOutOfBounds {
        icon: String,
        sheet_width: u32,
        sheet_height: u32,
    },
}

/// Why a shield source could not be used.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Sprite(#[from] SpriteError),
}
