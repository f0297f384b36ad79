//! Stable, filesystem-safe identifiers for cache entries.
//!
//! Resource keys are arbitrary strings: full URLs, composite keys such as
//! `"<imageBaseURL>@2x.png"`, or sprite names. They may contain characters
//! that are not valid in file names, so both cache tiers and the sprite
//! metadata store address entries by a derived key instead.
//!
//! The derived key is the lowercase hexadecimal SHA-256 digest of the raw
//! key. It is case-, whitespace- and punctuation-sensitive, always 64
//! characters long and contains only `[0-9a-f]`.

use sha2::{Digest, Sha256};

/// Length of every derived key in characters.
pub const DERIVED_KEY_LEN: usize = 64;

/// Derive a stable, filesystem-safe identifier from a raw resource key.
///
/// Pure and deterministic: equal inputs always produce equal outputs. No
/// normalisation is applied, so `"i"` and `"I"` derive different keys.
///
/// # Example
///
/// ```
/// use shieldcache::key::derive_key;
///
/// assert_eq!(derive_key("hello"), derive_key("hello"));
/// assert_ne!(derive_key("i"), derive_key("I"));
/// assert_eq!(derive_key("").len(), 64);
/// ```
pub fn derive_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Check whether a string has the shape of a derived key.
pub fn is_derived_key(candidate: &str) -> bool {
    candidate.len() == DERIVED_KEY_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
