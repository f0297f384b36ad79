//! Cutting a single shield out of a sprite sheet.

use std::io::Cursor;

use bytes::Bytes;
use image::{GenericImageView, ImageFormat};

use super::metadata::SpriteInfo;
use super::SpriteError;

/// Crop the region described by `info` out of a PNG sprite sheet and
/// re-encode it as PNG.
pub fn crop_region(sheet: &[u8], icon: &str, info: &SpriteInfo) -> Result<Bytes, SpriteError> {
    let image = image::load_from_memory_with_format(sheet, ImageFormat::Png)
        .map_err(|e| SpriteError::Image(e.to_string()))?;

    let (sheet_width, sheet_height) = image.dimensions();
    let fits = info.width > 0
        && info.height > 0
        && info.x.checked_add(info.width).is_some_and(|right| right <= sheet_width)
        && info.y.checked_add(info.height).is_some_and(|bottom| bottom <= sheet_height);
    if !fits {
        return Err(SpriteError::RegionOutOfBounds {
            icon: icon.to_string(),
            sheet_width,
            sheet_height,
        });
    }

    let cropped = image.crop_imm(info.x, info.y, info.width, info.height);
    let mut out = Cursor::new(Vec::new());
    cropped
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| SpriteError::Image(e.to_string()))?;
    Ok(Bytes::from(out.into_inner()))
}
