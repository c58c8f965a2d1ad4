//! Manifest record codec
//!
//! Every asset in an archive is listed in the header manifest as a
//! fixed-size record:
//!
//! ```text
//! class_id: [u8; 16]   raw UUID bytes
//! name:     [u8; 256]  UTF-8, left-justified, padded with ASCII space
//! ```
//!
//! Names longer than 256 bytes are truncated at the last UTF-8 character
//! boundary that fits, so a decoded name is always valid UTF-8. Truncation
//! is lossy and visible to callers on restore.

use crate::types::{AssetKey, ClassId};
use serde::{Deserialize, Serialize};

/// Size of the class id field in bytes
pub const CLASS_ID_LEN: usize = 16;

/// Size of the name field in bytes
pub const NAME_FIELD_LEN: usize = 256;

/// Size of one encoded manifest record
pub const ASSET_RECORD_LEN: usize = CLASS_ID_LEN + NAME_FIELD_LEN;

const PADDING: u8 = b' ';

/// Identity of one asset as stored in the archive manifest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Class of the asset
    pub class_id: ClassId,
    /// Asset name, at most 256 UTF-8 bytes
    pub name: String,
}

impl AssetRecord {
    /// Create a record, normalizing the name the way the codec stores it
    ///
    /// The returned name is what a reader will see after a round trip.
    pub fn new(class_id: ClassId, name: &str) -> Self {
        Self {
            class_id,
            name: normalize_name(name).to_string(),
        }
    }

    /// Key addressing this asset's entry inside the archive
    pub fn key(&self) -> AssetKey {
        AssetKey::new(self.class_id, &self.name)
    }

    /// Encode to the fixed on-disk layout
    pub fn to_bytes(&self) -> [u8; ASSET_RECORD_LEN] {
        encode(self.class_id, &self.name)
    }

    /// Decode from the fixed on-disk layout
    ///
    /// Returns None if the name field is not valid UTF-8.
    pub fn from_bytes(bytes: &[u8; ASSET_RECORD_LEN]) -> Option<Self> {
        decode(bytes).map(|(class_id, name)| Self { class_id, name })
    }
}

/// Encode a class id and name into a 272-byte record
pub fn encode(class_id: ClassId, name: &str) -> [u8; ASSET_RECORD_LEN] {
    let mut out = [PADDING; ASSET_RECORD_LEN];
    out[..CLASS_ID_LEN].copy_from_slice(class_id.as_bytes());

    let name = truncate_at_char_boundary(name, NAME_FIELD_LEN);
    out[CLASS_ID_LEN..CLASS_ID_LEN + name.len()].copy_from_slice(name.as_bytes());
    out
}

/// Decode a 272-byte record into a class id and name
///
/// Trailing spaces and NUL bytes are trimmed from the name.
pub fn decode(bytes: &[u8; ASSET_RECORD_LEN]) -> Option<(ClassId, String)> {
    let mut id = [0u8; CLASS_ID_LEN];
    id.copy_from_slice(&bytes[..CLASS_ID_LEN]);

    let name = std::str::from_utf8(&bytes[CLASS_ID_LEN..]).ok()?;
    let name = name.trim_end_matches([' ', '\0']);
    Some((ClassId::from_bytes(id), name.to_string()))
}

/// Name exactly as it reads back after encode + decode
pub fn normalize_name(name: &str) -> &str {
    truncate_at_char_boundary(name, NAME_FIELD_LEN).trim_end_matches([' ', '\0'])
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
