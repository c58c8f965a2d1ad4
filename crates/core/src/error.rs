//! Error types for assets
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for asset operations
pub type AssetResult<T> = std::result::Result<T, AssetError>;

/// Errors raised by an [`Asset`](crate::asset::Asset)
#[derive(Debug, Error)]
pub enum AssetError {
    /// The asset was disposed and can no longer be opened
    #[error("Asset disposed: {0}")]
    Disposed(String),

    /// The asset's source failed to open earlier and will not be retried
    #[error("Asset unavailable: {0}")]
    Unavailable(String),

    /// I/O error while opening the asset's source
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AssetError {
    /// Create a disposed error for the named asset
    pub fn disposed(name: impl Into<String>) -> Self {
        Self::Disposed(name.into())
    }

    /// Create an unavailable error for the named asset
    pub fn unavailable(name: impl Into<String>) -> Self {
        Self::Unavailable(name.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AssetError::disposed("server.key");
        assert!(err.to_string().contains("disposed"));
        assert!(err.to_string().contains("server.key"));

        let err = AssetError::unavailable("server.key");
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: AssetError = io_err.into();
        assert!(matches!(err, AssetError::Io(_)));
    }
}
