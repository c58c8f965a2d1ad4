//! Backup archive writer
//!
//! Layers, outermost first: output channel, zstd encoder, optional
//! AES-256-CBC encryptor, tar builder. The header and manifest are written
//! when the session is created; each asset then becomes one tar entry.
//! Closing finishes the layers innermost first.

use crate::cipher::CbcWriter;
use crate::config::ArchiveOptions;
use crate::entry::append_entry;
use crate::error::{ArchiveError, ArchiveResult};
use crate::format::{to_ticks, ArchiveHeader, ARCHIVE_MAGIC, UNENCRYPTED_IV};
use crate::key::{derive_key, generate_iv};
use crate::progress::{Progress, ProgressSink};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io::{self, Seek, SeekFrom, Write};
use strata_backup_core::{Asset, AssetKey, AssetRecord};
use tar::Builder;
use tracing::{debug, info, warn};

/// Compression layer, optionally wrapped by the cipher
enum WriteLayer<W: Write> {
    Plain(zstd::Encoder<'static, W>),
    Encrypted(CbcWriter<zstd::Encoder<'static, W>>),
}

impl<W: Write> WriteLayer<W> {
    /// Finish the cipher (if any), then the compressor
    fn finish(self) -> io::Result<W> {
        let encoder = match self {
            WriteLayer::Plain(encoder) => encoder,
            WriteLayer::Encrypted(cipher) => cipher.finish()?,
        };
        encoder.finish()
    }
}

impl<W: Write> Write for WriteLayer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            WriteLayer::Plain(encoder) => encoder.write(buf),
            WriteLayer::Encrypted(cipher) => cipher.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            WriteLayer::Plain(encoder) => encoder.flush(),
            WriteLayer::Encrypted(cipher) => cipher.flush(),
        }
    }
}

enum WriterState<W: Write> {
    Open(Builder<WriteLayer<W>>),
    Closed(Option<W>),
}

/// Writer session for one backup archive
///
/// Created over an output channel and the full list of assets it will
/// contain. Every asset is then written with
/// [`write_asset_entry`](Self::write_asset_entry), and the session is
/// finished with [`close`](Self::close) or [`into_inner`](Self::into_inner).
/// Dropping an open writer closes it and logs any error.
pub struct ArchiveWriter<W: Write> {
    state: WriterState<W>,
    manifest: Vec<AssetRecord>,
    keys: HashSet<AssetKey>,
    created_at: DateTime<Utc>,
    mtime: u64,
    encrypted: bool,
    written: u64,
    progress: Progress,
}

impl<W: Write> ArchiveWriter<W> {
    /// Start an archive over `output` for `assets`
    ///
    /// Writes the header and manifest, in list order, before returning.
    /// With a passphrase in `options`, a fresh IV is generated and all
    /// entries are encrypted.
    pub fn create<A: Asset>(
        output: W,
        assets: &[A],
        options: &ArchiveOptions,
    ) -> ArchiveResult<Self> {
        options.validate()?;

        let created_at = Utc::now();
        let records: Vec<AssetRecord> = assets.iter().map(|asset| asset.record()).collect();

        let mut encoder = zstd::Encoder::new(output, options.compression_level)?;

        let (iv, key) = match &options.passphrase {
            Some(passphrase) => (generate_iv(), Some(derive_key(passphrase))),
            None => (UNENCRYPTED_IV, None),
        };

        let header = ArchiveHeader {
            created_ticks: to_ticks(created_at),
            records,
            iv,
        };
        header.write_to(&mut encoder)?;

        let layer = match key {
            Some(key) => {
                let mut cipher = CbcWriter::new(encoder, &key, &iv);
                cipher.write_all(ARCHIVE_MAGIC)?;
                WriteLayer::Encrypted(cipher)
            }
            None => WriteLayer::Plain(encoder),
        };

        let manifest = header.records;
        let keys = manifest.iter().map(AssetRecord::key).collect();
        let encrypted = options.is_encrypted();

        info!(
            target: "strata::backup",
            assets = manifest.len(),
            encrypted,
            level = options.compression_level,
            "Created backup archive"
        );

        Ok(Self {
            state: WriterState::Open(Builder::new(layer)),
            progress: Progress::new(manifest.len() as u64),
            manifest,
            keys,
            mtime: u64::try_from(created_at.timestamp()).unwrap_or(0),
            created_at,
            encrypted,
            written: 0,
        })
    }

    /// Report progress to `sink` after each entry written
    pub fn with_progress(mut self, sink: impl ProgressSink + Send + 'static) -> Self {
        self.progress.set_sink(Box::new(sink));
        self
    }

    /// Write one asset as an archive entry
    ///
    /// Opens the asset, streams its full payload and leaves it open; the
    /// caller still owns and disposes it. The asset must be one of those
    /// the session was created with.
    pub fn write_asset_entry<A: Asset + ?Sized>(&mut self, asset: &mut A) -> ArchiveResult<()> {
        let builder = match &mut self.state {
            WriterState::Open(builder) => builder,
            WriterState::Closed(_) => return Err(ArchiveError::Disposed),
        };

        let record = asset.record();
        let key = record.key();
        if !self.keys.contains(&key) {
            return Err(ArchiveError::manifest_mismatch(key.as_str()));
        }

        // Opening first pins the stream and, for lazy sources, the length.
        asset.open()?;
        let declared = asset.payload_len();
        let reader = asset.open()?;

        let len = match declared {
            Some(len) => {
                append_entry(builder, &key, self.mtime, len, reader)?;
                len
            }
            None => {
                let mut spool = tempfile::tempfile()?;
                let len = io::copy(reader, &mut spool)?;
                spool.seek(SeekFrom::Start(0))?;
                append_entry(builder, &key, self.mtime, len, &mut spool)?;
                len
            }
        };

        self.written += 1;
        debug!(target: "strata::backup", key = %key, bytes = len, spooled = declared.is_none(), "Wrote archive entry");
        self.progress.advance(&format!("Backed up {}", record.name));
        Ok(())
    }

    /// Finish the archive and close every layer
    ///
    /// Idempotent: later calls return `Ok(())` without writing anything.
    pub fn close(&mut self) -> ArchiveResult<()> {
        let builder = match std::mem::replace(&mut self.state, WriterState::Closed(None)) {
            WriterState::Open(builder) => builder,
            closed => {
                self.state = closed;
                return Ok(());
            }
        };

        if self.written < self.manifest.len() as u64 {
            warn!(
                target: "strata::backup",
                written = self.written,
                manifest = self.manifest.len(),
                "Closing archive with fewer entries than manifest records"
            );
        }

        let layer = builder.into_inner()?;
        let mut output = layer.finish()?;
        output.flush()?;
        self.state = WriterState::Closed(Some(output));

        info!(target: "strata::backup", entries = self.written, "Closed backup archive");
        Ok(())
    }

    /// Close the archive and return the output channel
    pub fn into_inner(mut self) -> ArchiveResult<W> {
        self.close()?;
        match std::mem::replace(&mut self.state, WriterState::Closed(None)) {
            WriterState::Closed(Some(output)) => Ok(output),
            _ => Err(ArchiveError::Disposed),
        }
    }

    /// Manifest records in write order
    pub fn manifest(&self) -> &[AssetRecord] {
        &self.manifest
    }

    /// Creation time recorded in the header
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether entries are encrypted
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Number of entries written so far
    pub fn entries_written(&self) -> u64 {
        self.written
    }

    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        matches!(self.state, WriterState::Closed(_))
    }
}

impl<W: Write> Drop for ArchiveWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(target: "strata::backup", error = %e, "Failed to close archive writer on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ArchiveHeader;
    use std::io::{Cursor, Read};
    use strata_backup_core::{AssetSource, ClassId, LazyAsset, MemoryAsset};

    fn sample_assets() -> Vec<MemoryAsset> {
        let id = ClassId::new();
        vec![
            MemoryAsset::new(id, "foo", b"foo payload".to_vec()),
            MemoryAsset::new(id, "bar", vec![0xAB; 4096]),
        ]
    }

    fn decompress(data: &[u8]) -> Vec<u8> {
        let mut decoder = zstd::Decoder::new(data).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_header_written_on_create() {
        let assets = sample_assets();
        let writer = ArchiveWriter::create(Vec::new(), &assets, &ArchiveOptions::for_testing())
            .unwrap();
        assert_eq!(writer.manifest().len(), 2);
        assert!(!writer.is_encrypted());

        let data = writer.into_inner().unwrap();
        let plain = decompress(&data);
        let header = ArchiveHeader::read_from(&mut Cursor::new(&plain), 10).unwrap();
        assert_eq!(header.records[0].name, "foo");
        assert_eq!(header.records[1].name, "bar");
        assert!(!header.is_encrypted());
    }

    #[test]
    fn test_encrypted_header_has_iv() {
        let assets = sample_assets();
        let options = ArchiveOptions::for_testing().with_passphrase("secret");
        let writer = ArchiveWriter::create(Vec::new(), &assets, &options).unwrap();
        assert!(writer.is_encrypted());

        let data = writer.into_inner().unwrap();
        let plain = decompress(&data);
        let header = ArchiveHeader::read_from(&mut Cursor::new(&plain), 10).unwrap();
        assert!(header.is_encrypted());
    }

    #[test]
    fn test_write_after_close_fails() {
        let mut assets = sample_assets();
        let mut writer =
            ArchiveWriter::create(Vec::new(), &assets, &ArchiveOptions::for_testing()).unwrap();
        writer.close().unwrap();

        let err = writer.write_asset_entry(&mut assets[0]).unwrap_err();
        assert!(matches!(err, ArchiveError::Disposed));
    }

    #[test]
    fn test_double_close_is_noop() {
        let assets = sample_assets();
        let mut writer =
            ArchiveWriter::create(Vec::new(), &assets, &ArchiveOptions::for_testing()).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(writer.is_closed());

        let data = writer.into_inner().unwrap();
        assert!(!data.is_empty());
    }

    #[test]
    fn test_asset_not_in_manifest_rejected() {
        let assets = sample_assets();
        let mut writer =
            ArchiveWriter::create(Vec::new(), &assets, &ArchiveOptions::for_testing()).unwrap();

        let mut stranger = MemoryAsset::new(ClassId::new(), "stranger", b"x".to_vec());
        let err = writer.write_asset_entry(&mut stranger).unwrap_err();
        assert!(matches!(err, ArchiveError::ManifestMismatch { .. }));
    }

    #[test]
    fn test_asset_left_open_after_write() {
        let mut assets = sample_assets();
        let mut writer =
            ArchiveWriter::create(Vec::new(), &assets, &ArchiveOptions::for_testing()).unwrap();
        writer.write_asset_entry(&mut assets[0]).unwrap();
        assert!(!assets[0].is_disposed());
        assert_eq!(writer.entries_written(), 1);
    }

    #[test]
    fn test_disposed_asset_rejected() {
        let mut assets = sample_assets();
        let mut writer =
            ArchiveWriter::create(Vec::new(), &assets, &ArchiveOptions::for_testing()).unwrap();
        assets[0].dispose();

        let err = writer.write_asset_entry(&mut assets[0]).unwrap_err();
        assert!(matches!(err, ArchiveError::Asset(_)));
    }

    #[test]
    fn test_unknown_length_source_spooled() {
        let id = ClassId::new();
        let mut assets = vec![LazyAsset::new(id, "stream", || {
            Ok(AssetSource::unknown_len(Cursor::new(vec![5u8; 10_000])))
        })];
        let mut writer =
            ArchiveWriter::create(Vec::new(), &assets, &ArchiveOptions::for_testing()).unwrap();
        writer.write_asset_entry(&mut assets[0]).unwrap();
        let data = writer.into_inner().unwrap();

        let plain = decompress(&data);
        assert!(plain.windows(16).any(|w| w == [5u8; 16]));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let assets = sample_assets();
        let options = ArchiveOptions::new().with_compression_level(99);
        let result = ArchiveWriter::create(Vec::new(), &assets, &options);
        assert!(matches!(result, Err(ArchiveError::Config(_))));
    }

    #[test]
    fn test_drop_finishes_archive() {
        let assets = sample_assets();
        let mut buf = Vec::new();
        {
            let _writer =
                ArchiveWriter::create(&mut buf, &assets, &ArchiveOptions::for_testing()).unwrap();
        }
        let plain = decompress(&buf);
        assert!(plain.starts_with(ARCHIVE_MAGIC));
    }
}
