//! Archive error types

use crate::channel::{take_channel_error, untag};
use crate::config::ArchiveConfigError;
use std::io;
use strata_backup_core::AssetError;
use thiserror::Error;

/// Errors that can occur while writing or reading a backup archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Input is not a backup archive, or its structure is corrupt
    #[error("Invalid archive format: {0}")]
    InvalidFormat(String),

    /// Archive is encrypted and no passphrase was supplied
    #[error("Archive is encrypted, a passphrase is required")]
    PassphraseRequired,

    /// Decrypted self-check did not match; the passphrase is wrong
    #[error("Invalid passphrase")]
    InvalidPassphrase,

    /// An entry key has no matching manifest record
    #[error("Archive entry {key} does not match any manifest record")]
    ManifestMismatch {
        /// Key of the offending entry
        key: String,
    },

    /// Operation on a session that was already closed
    #[error("Archive session has been disposed")]
    Disposed,

    /// Asset failed to open
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    /// Options failed validation
    #[error("Invalid archive options: {0}")]
    Config(#[from] ArchiveConfigError),

    /// IO error from the underlying channel
    #[error("IO error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        Self::Io(untag(err))
    }
}

impl ArchiveError {
    /// Create an invalid format error
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Create a manifest mismatch error
    pub fn manifest_mismatch(key: impl Into<String>) -> Self {
        Self::ManifestMismatch { key: key.into() }
    }

    /// Classify an I/O error hit while parsing archive structure
    ///
    /// Short reads and undecodable compressed or ciphered data mean the
    /// archive is malformed. Errors raised by the input channel itself, and
    /// any other kind, pass through untouched.
    pub(crate) fn from_structure_read(err: io::Error, what: &str) -> Self {
        let err = match take_channel_error(err) {
            Ok(channel) => return Self::Io(channel),
            Err(err) => err,
        };
        match err.kind() {
            io::ErrorKind::UnexpectedEof => {
                Self::InvalidFormat(format!("truncated {}", what))
            }
            io::ErrorKind::InvalidData | io::ErrorKind::Other => {
                Self::InvalidFormat(format!("corrupt {}: {}", what, err))
            }
            _ => Self::Io(err),
        }
    }

    /// Whether this error means the archive bytes themselves are bad
    pub fn is_format_error(&self) -> bool {
        matches!(self, Self::InvalidFormat(_) | Self::ManifestMismatch { .. })
    }
}

/// Result type for archive operations
pub type ArchiveResult<T> = Result<T, ArchiveError>;
