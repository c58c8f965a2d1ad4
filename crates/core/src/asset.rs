//! Asset abstraction
//!
//! An asset is a named, classified unit of data eligible for backup. The
//! archive writer only needs to read an asset once, so every variant opens
//! its byte stream lazily and freezes it on first open: later calls to
//! [`Asset::open`] return the same handle, and the backing source is never
//! reopened underneath a reader.
//!
//! Variants provided here:
//! - [`LazyAsset`]: deferred stream factory, invoked at most once
//! - [`MemoryAsset`]: in-memory buffer
//! - [`FileAsset`]: file opened for read on first use
//!
//! The read-side variant wrapping a live archive entry lives in the
//! archive crate.

use crate::error::{AssetError, AssetResult};
use crate::manifest::AssetRecord;
use crate::types::{AssetKey, ClassId};
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

/// Capability shared by every asset variant
pub trait Asset {
    /// Class of the asset
    fn class_id(&self) -> ClassId;

    /// Name of the asset, unique within its class
    fn name(&self) -> &str;

    /// Exact payload length, if known
    ///
    /// Lazily opened variants may only know their length after `open`.
    fn payload_len(&self) -> Option<u64>;

    /// Open the asset's byte stream
    ///
    /// The first call fixes the stream; later calls return the same one.
    /// Fails with [`AssetError::Disposed`] after [`Asset::dispose`].
    fn open(&mut self) -> AssetResult<&mut dyn Read>;

    /// Release the stream and any backing resource
    ///
    /// Idempotent. The asset cannot be opened afterwards.
    fn dispose(&mut self);

    /// Whether [`Asset::dispose`] has been called
    fn is_disposed(&self) -> bool;

    /// Manifest record for this asset
    fn record(&self) -> AssetRecord {
        AssetRecord::new(self.class_id(), self.name())
    }

    /// Archive key for this asset
    fn key(&self) -> AssetKey {
        self.record().key()
    }
}

impl<A: Asset + ?Sized> Asset for Box<A> {
    fn class_id(&self) -> ClassId {
        (**self).class_id()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn payload_len(&self) -> Option<u64> {
        (**self).payload_len()
    }

    fn open(&mut self) -> AssetResult<&mut dyn Read> {
        (**self).open()
    }

    fn dispose(&mut self) {
        (**self).dispose()
    }

    fn is_disposed(&self) -> bool {
        (**self).is_disposed()
    }
}

/// Byte stream produced by a [`LazyAsset`] factory
pub struct AssetSource {
    reader: Box<dyn Read + Send>,
    len: Option<u64>,
}

impl AssetSource {
    /// Source with a known exact length
    pub fn sized(reader: impl Read + Send + 'static, len: u64) -> Self {
        Self {
            reader: Box::new(reader),
            len: Some(len),
        }
    }

    /// Source whose length is only known once it has been read to the end
    pub fn unknown_len(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            len: None,
        }
    }

    /// Declared length, if any
    pub fn len(&self) -> Option<u64> {
        self.len
    }

    /// Whether the source is known to be empty
    pub fn is_empty(&self) -> bool {
        self.len == Some(0)
    }
}

impl fmt::Debug for AssetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetSource").field("len", &self.len).finish()
    }
}

type SourceFactory = Box<dyn FnOnce() -> io::Result<AssetSource> + Send>;

enum LazyState {
    Pending(SourceFactory),
    Open(AssetSource),
    Failed,
    Disposed,
}

/// Asset backed by a deferred stream factory
///
/// The factory runs on the first `open` and never again. If it fails, the
/// error is returned once and later opens fail with
/// [`AssetError::Unavailable`].
pub struct LazyAsset {
    class_id: ClassId,
    name: String,
    state: LazyState,
}

impl LazyAsset {
    /// Create an asset whose stream is produced by `factory` on first open
    pub fn new<F>(class_id: ClassId, name: impl Into<String>, factory: F) -> Self
    where
        F: FnOnce() -> io::Result<AssetSource> + Send + 'static,
    {
        Self {
            class_id,
            name: name.into(),
            state: LazyState::Pending(Box::new(factory)),
        }
    }

    /// Whether the factory has already run successfully
    pub fn is_open(&self) -> bool {
        matches!(self.state, LazyState::Open(_))
    }
}

impl Asset for LazyAsset {
    fn class_id(&self) -> ClassId {
        self.class_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn payload_len(&self) -> Option<u64> {
        match &self.state {
            LazyState::Open(source) => source.len,
            _ => None,
        }
    }

    fn open(&mut self) -> AssetResult<&mut dyn Read> {
        // Failed is the state left behind if the factory errors.
        let state = std::mem::replace(&mut self.state, LazyState::Failed);
        self.state = match state {
            LazyState::Pending(factory) => LazyState::Open(factory()?),
            other => other,
        };

        match &mut self.state {
            LazyState::Open(source) => {
                let reader: &mut dyn Read = source.reader.as_mut();
                Ok(reader)
            }
            LazyState::Disposed => Err(AssetError::disposed(self.name.clone())),
            LazyState::Failed | LazyState::Pending(_) => {
                Err(AssetError::unavailable(self.name.clone()))
            }
        }
    }

    fn dispose(&mut self) {
        self.state = LazyState::Disposed;
    }

    fn is_disposed(&self) -> bool {
        matches!(self.state, LazyState::Disposed)
    }
}

impl fmt::Debug for LazyAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            LazyState::Pending(_) => "pending",
            LazyState::Open(_) => "open",
            LazyState::Failed => "failed",
            LazyState::Disposed => "disposed",
        };
        f.debug_struct("LazyAsset")
            .field("class_id", &self.class_id)
            .field("name", &self.name)
            .field("state", &state)
            .finish()
    }
}

/// Asset backed by an in-memory buffer
#[derive(Debug)]
pub struct MemoryAsset {
    inner: LazyAsset,
    len: u64,
}

impl MemoryAsset {
    /// Create an asset over `data`
    pub fn new(class_id: ClassId, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let len = data.len() as u64;
        let inner = LazyAsset::new(class_id, name, move || {
            Ok(AssetSource::sized(Cursor::new(data), len))
        });
        Self { inner, len }
    }
}

impl Asset for MemoryAsset {
    fn class_id(&self) -> ClassId {
        self.inner.class_id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn payload_len(&self) -> Option<u64> {
        Some(self.len)
    }

    fn open(&mut self) -> AssetResult<&mut dyn Read> {
        self.inner.open()
    }

    fn dispose(&mut self) {
        self.inner.dispose()
    }

    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

/// Asset backed by a file, opened for read on first use
#[derive(Debug)]
pub struct FileAsset {
    inner: LazyAsset,
    path: PathBuf,
}

impl FileAsset {
    /// Create an asset over the file at `path`
    ///
    /// The file is not touched until the asset is opened.
    pub fn new(class_id: ClassId, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let open_path = path.clone();
        let inner = LazyAsset::new(class_id, name, move || {
            let file = File::open(&open_path)?;
            let len = file.metadata()?.len();
            Ok(AssetSource::sized(file, len))
        });
        Self { inner, path }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Asset for FileAsset {
    fn class_id(&self) -> ClassId {
        self.inner.class_id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn payload_len(&self) -> Option<u64> {
        self.inner.payload_len()
    }

    fn open(&mut self) -> AssetResult<&mut dyn Read> {
        self.inner.open()
    }

    fn dispose(&mut self) {
        self.inner.dispose()
    }

    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn read_all(asset: &mut dyn Asset) -> Vec<u8> {
        let mut out = Vec::new();
        asset.open().unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_memory_asset_reads_payload() {
        let mut asset = MemoryAsset::new(ClassId::new(), "foo", b"hello".to_vec());
        assert_eq!(asset.payload_len(), Some(5));
        assert_eq!(read_all(&mut asset), b"hello");
    }

    #[test]
    fn test_open_is_frozen() {
        let mut asset = MemoryAsset::new(ClassId::new(), "foo", b"abcdef".to_vec());

        let mut first = [0u8; 3];
        asset.open().unwrap().read_exact(&mut first).unwrap();
        assert_eq!(&first, b"abc");

        // Second open continues the same stream instead of restarting it
        let mut rest = Vec::new();
        asset.open().unwrap().read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"def");
    }

    #[test]
    fn test_factory_invoked_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut asset = LazyAsset::new(ClassId::new(), "lazy", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(AssetSource::unknown_len(Cursor::new(b"data".to_vec())))
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!asset.is_open());
        asset.open().unwrap();
        asset.open().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(asset.is_open());
        assert_eq!(asset.payload_len(), None);
    }

    #[test]
    fn test_open_after_dispose_fails() {
        let mut asset = MemoryAsset::new(ClassId::new(), "foo", b"x".to_vec());
        asset.open().unwrap();
        asset.dispose();
        asset.dispose();

        assert!(asset.is_disposed());
        assert!(matches!(asset.open(), Err(AssetError::Disposed(_))));
    }

    #[test]
    fn test_failed_factory_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut asset = LazyAsset::new(ClassId::new(), "broken", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        });

        assert!(matches!(asset.open(), Err(AssetError::Io(_))));
        assert!(matches!(asset.open(), Err(AssetError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_file_asset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.pem");
        std::fs::write(&path, b"-----BEGIN CERTIFICATE-----").unwrap();

        let mut asset = FileAsset::new(ClassId::new(), "server.pem", &path);
        assert_eq!(asset.path(), path.as_path());
        assert_eq!(asset.payload_len(), None);
        assert_eq!(read_all(&mut asset), b"-----BEGIN CERTIFICATE-----");
        assert_eq!(asset.payload_len(), Some(27));
    }

    #[test]
    fn test_file_asset_missing_file() {
        let dir = tempdir().unwrap();
        let mut asset = FileAsset::new(ClassId::new(), "gone", dir.path().join("missing"));
        assert!(matches!(asset.open(), Err(AssetError::Io(_))));
    }

    #[test]
    fn test_boxed_asset_delegates() {
        let id = ClassId::new();
        let mut asset: Box<dyn Asset> = Box::new(MemoryAsset::new(id, "boxed", b"123".to_vec()));
        assert_eq!(asset.class_id(), id);
        assert_eq!(asset.name(), "boxed");
        assert_eq!(asset.key().as_str(), format!("{}/boxed", id));
        assert_eq!(read_all(&mut asset), b"123");
    }
}
