//! Archive configuration.

use std::fmt;

/// Default zstd compression level
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Default bound on the asset count a reader will accept
pub const DEFAULT_MAX_MANIFEST_ENTRIES: u64 = 1 << 20;

/// Default bound on a GNU long-name payload
pub const DEFAULT_MAX_LONG_NAME_BYTES: u64 = 64 * 1024;

/// Passphrase protecting an archive
///
/// `Debug` output never includes the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(String);

impl Passphrase {
    /// Wrap a passphrase
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The secret text
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Passphrase {
    fn from(secret: &str) -> Self {
        Self::new(secret)
    }
}

impl From<String> for Passphrase {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(***)")
    }
}

/// Options for writing and reading archives.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Passphrase; `None` writes (or expects) an unencrypted archive.
    pub passphrase: Option<Passphrase>,

    /// Zstd compression level (1-22, default: 3).
    pub compression_level: i32,

    /// Largest asset count a reader accepts from an archive header.
    ///
    /// The count is read before any record, so it bounds allocation on
    /// hostile input.
    pub max_manifest_entries: u64,

    /// Largest GNU long-name entry a reader accepts (default: 64KB).
    pub max_long_name_bytes: u64,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        ArchiveOptions {
            passphrase: None,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            max_manifest_entries: DEFAULT_MAX_MANIFEST_ENTRIES,
            max_long_name_bytes: DEFAULT_MAX_LONG_NAME_BYTES,
        }
    }
}

impl ArchiveOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the passphrase (builder pattern).
    pub fn with_passphrase(mut self, passphrase: impl Into<Passphrase>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Set the compression level (builder pattern).
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Set the manifest entry bound (builder pattern).
    pub fn with_max_manifest_entries(mut self, max: u64) -> Self {
        self.max_manifest_entries = max;
        self
    }

    /// Set the long-name bound (builder pattern).
    pub fn with_max_long_name_bytes(mut self, max: u64) -> Self {
        self.max_long_name_bytes = max;
        self
    }

    /// Whether archives written with these options are encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.passphrase.is_some()
    }

    /// Validate options for writing.
    pub fn validate(&self) -> Result<(), ArchiveConfigError> {
        self.validate_limits()?;
        if !(1..=22).contains(&self.compression_level) {
            return Err(ArchiveConfigError::CompressionLevelOutOfRange(
                self.compression_level,
            ));
        }
        if matches!(&self.passphrase, Some(p) if p.expose().is_empty()) {
            return Err(ArchiveConfigError::EmptyPassphrase);
        }
        Ok(())
    }

    /// Validate the reader bounds only.
    ///
    /// The passphrase is not checked here: a reader ignores it for plain
    /// archives and treats an empty one as wrong for encrypted archives.
    pub fn validate_limits(&self) -> Result<(), ArchiveConfigError> {
        if self.max_long_name_bytes == 0 {
            return Err(ArchiveConfigError::ZeroLongNameLimit);
        }
        Ok(())
    }

    /// Options tuned for tests (fastest compression).
    pub fn for_testing() -> Self {
        ArchiveOptions {
            compression_level: 1,
            ..Default::default()
        }
    }
}

/// Option validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchiveConfigError {
    /// Compression level outside zstd's 1-22 range.
    #[error("Compression level must be between 1 and 22, got {0}")]
    CompressionLevelOutOfRange(i32),

    /// Long-name limit of zero would reject every long key.
    #[error("Long-name limit must be greater than zero")]
    ZeroLongNameLimit,

    /// An empty passphrase derives an all-zero key.
    #[error("Passphrase must not be empty")]
    EmptyPassphrase,
}
