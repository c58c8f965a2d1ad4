//! Core types for StrataBackup
//!
//! - ClassId: 128-bit identifier naming the kind of an asset
//! - AssetKey: the "classId/name" key addressing an asset inside an archive

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier for a class of assets
///
/// Every subsystem that contributes assets to a backup owns one or more
/// class identifiers. On restore, the class id tells the caller which
/// subsystem knows how to apply an asset's payload.
///
/// Stored on disk as the 16 raw UUID bytes (RFC 4122 byte order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId(Uuid);

impl ClassId {
    /// Create a new random ClassId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero ClassId
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Create a ClassId from raw bytes
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse a ClassId from a string representation
    ///
    /// Accepts standard UUID format (with or without hyphens).
    /// Returns None if the string is not a valid UUID.
    pub fn from_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Get the raw bytes of this ClassId
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClassId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ClassId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Lowercase hyphenated form; entry keys depend on it.
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Key of an asset inside an archive: `"{class_id}/{name}"`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetKey(String);

impl AssetKey {
    /// Build the key for a class id and name
    pub fn new(class_id: ClassId, name: &str) -> Self {
        Self(format!("{}/{}", class_id, name))
    }

    /// Wrap a key read back from an archive
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
