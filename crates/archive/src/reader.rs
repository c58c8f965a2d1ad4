//! Backup archive reader
//!
//! Opening validates the whole header (signature, timestamp, manifest, IV)
//! and, for encrypted archives, the passphrase before a session is
//! returned. Entries are then yielded one at a time as borrowed
//! [`EntryAsset`]s over the live stream; unread payload is skipped when the
//! next entry is requested.

use crate::channel::{take_channel_error, ChannelReader};
use crate::cipher::CbcReader;
use crate::config::{ArchiveOptions, Passphrase};
use crate::entry::{padding_for, read_entry_header, skip};
use crate::error::{ArchiveError, ArchiveResult};
use crate::format::{from_ticks, read_magic, ArchiveHeader};
use crate::key::derive_key;
use crate::progress::{Progress, ProgressSink};
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::{self, BufReader, Read};
use strata_backup_core::{Asset, AssetError, AssetKey, AssetRecord, AssetResult, ClassId};
use tracing::{debug, info, warn};

type Decoder<R> = zstd::Decoder<'static, BufReader<ChannelReader<R>>>;

/// Decompression layer, optionally wrapped by the cipher
enum ReadLayer<R: Read> {
    Plain(Decoder<R>),
    Encrypted(CbcReader<Decoder<R>>),
}

impl<R: Read> ReadLayer<R> {
    fn into_decoder(self) -> Decoder<R> {
        match self {
            ReadLayer::Plain(decoder) => decoder,
            ReadLayer::Encrypted(cipher) => cipher.into_inner(),
        }
    }
}

impl<R: Read> Read for ReadLayer<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ReadLayer::Plain(decoder) => decoder.read(buf),
            ReadLayer::Encrypted(cipher) => cipher.read(buf),
        }
    }
}

struct OpenState<R: Read> {
    layer: ReadLayer<R>,
    /// Unread payload of the current entry
    payload_left: u64,
    /// Padding after the current entry's payload
    padding_left: u64,
    exhausted: bool,
}

impl<R: Read> OpenState<R> {
    /// Skip whatever remains of the current entry
    fn finish_entry(&mut self) -> ArchiveResult<()> {
        skip(&mut self.layer, self.payload_left + self.padding_left)
            .map_err(|e| ArchiveError::from_structure_read(e, "entry payload"))?;
        self.payload_left = 0;
        self.padding_left = 0;
        Ok(())
    }
}

/// Reader session for one backup archive
///
/// Dropping an open reader closes it and logs any error.
pub struct ArchiveReader<R: Read> {
    state: Option<OpenState<R>>,
    assets: Vec<AssetRecord>,
    keys: Vec<AssetKey>,
    backup_date: DateTime<Utc>,
    encrypted: bool,
    max_long_name: u64,
    entries_read: u64,
    progress: Progress,
}

impl<R: Read> ArchiveReader<R> {
    /// Open an archive, with a passphrase if it may be encrypted
    pub fn open(input: R, passphrase: Option<&Passphrase>) -> ArchiveResult<Self> {
        let options = ArchiveOptions {
            passphrase: passphrase.cloned(),
            ..ArchiveOptions::default()
        };
        Self::open_with_options(input, &options)
    }

    /// Open an archive with explicit options
    ///
    /// Fails with [`ArchiveError::InvalidFormat`] for anything that is not a
    /// well-formed archive, [`ArchiveError::PassphraseRequired`] for an
    /// encrypted archive without a passphrase, and
    /// [`ArchiveError::InvalidPassphrase`] when the passphrase check fails.
    pub fn open_with_options(input: R, options: &ArchiveOptions) -> ArchiveResult<Self> {
        options.validate_limits()?;

        // Stop at the end of the frame; anything after it is drained raw on close.
        let mut decoder = zstd::Decoder::new(ChannelReader::new(input))?.single_frame();
        let header = ArchiveHeader::read_from(&mut decoder, options.max_manifest_entries)?;

        let backup_date = from_ticks(header.created_ticks)
            .ok_or_else(|| ArchiveError::invalid_format("creation timestamp out of range"))?;

        let encrypted = header.is_encrypted();
        let layer = if encrypted {
            let passphrase = options
                .passphrase
                .as_ref()
                .ok_or(ArchiveError::PassphraseRequired)?;
            if passphrase.expose().is_empty() {
                return Err(ArchiveError::InvalidPassphrase);
            }
            let key = derive_key(passphrase);
            let mut cipher = CbcReader::new(decoder, &key, &header.iv);
            match read_magic(&mut cipher) {
                Ok(true) => {}
                Ok(false) => return Err(ArchiveError::InvalidPassphrase),
                Err(e) => match take_channel_error(e) {
                    Ok(channel) => return Err(ArchiveError::Io(channel)),
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                        return Err(ArchiveError::InvalidPassphrase)
                    }
                    Err(e) => {
                        return Err(ArchiveError::from_structure_read(e, "passphrase check"))
                    }
                },
            }
            ReadLayer::Encrypted(cipher)
        } else {
            if options.passphrase.is_some() {
                debug!(target: "strata::backup", "Archive is not encrypted, ignoring passphrase");
            }
            ReadLayer::Plain(decoder)
        };

        let assets = header.records;
        let keys = assets.iter().map(AssetRecord::key).collect();

        info!(
            target: "strata::backup",
            assets = assets.len(),
            encrypted,
            backup_date = %backup_date,
            "Opened backup archive"
        );

        Ok(Self {
            state: Some(OpenState {
                layer,
                payload_left: 0,
                padding_left: 0,
                exhausted: false,
            }),
            progress: Progress::new(assets.len() as u64),
            assets,
            keys,
            backup_date,
            encrypted,
            max_long_name: options.max_long_name_bytes,
            entries_read: 0,
        })
    }

    /// Report progress to `sink` after each entry yielded
    pub fn with_progress(mut self, sink: impl ProgressSink + Send + 'static) -> Self {
        self.progress.set_sink(Box::new(sink));
        self
    }

    /// Advance to the next entry
    ///
    /// Returns `Ok(None)` once every entry has been read. The returned asset
    /// borrows the session; whatever the caller leaves unread is skipped by
    /// the next call. An entry whose key matches no manifest record fails
    /// with [`ArchiveError::ManifestMismatch`].
    pub fn next_entry(&mut self) -> ArchiveResult<Option<EntryAsset<'_, R>>> {
        let state = self.state.as_mut().ok_or(ArchiveError::Disposed)?;
        if state.exhausted {
            return Ok(None);
        }

        state.finish_entry()?;
        let header = match read_entry_header(&mut state.layer, self.max_long_name)? {
            Some(header) => header,
            None => {
                state.exhausted = true;
                debug!(target: "strata::backup", entries = self.entries_read, "Reached end of archive entries");
                return Ok(None);
            }
        };
        state.payload_left = header.size;
        state.padding_left = padding_for(header.size);

        let record = self
            .keys
            .iter()
            .position(|key| key.as_str() == header.key)
            .map(|index| self.assets[index].clone())
            .ok_or_else(|| ArchiveError::manifest_mismatch(header.key.as_str()))?;

        self.entries_read += 1;
        debug!(target: "strata::backup", key = %header.key, bytes = header.size, "Read archive entry");
        self.progress.advance(&format!("Restored {}", record.name));

        Ok(Some(EntryAsset {
            record,
            size: header.size,
            mtime: header.mtime,
            stream: Some(EntryStream {
                layer: &mut state.layer,
                remaining: &mut state.payload_left,
            }),
        }))
    }

    /// Drain any unread entries and trailing bytes, then release the input
    ///
    /// Idempotent: later calls return `Ok(())`.
    pub fn close(&mut self) -> ArchiveResult<()> {
        let mut state = match self.state.take() {
            Some(state) => state,
            None => return Ok(()),
        };

        let mut skipped = 0u64;
        if !state.exhausted {
            state.finish_entry()?;
            while let Some(header) = read_entry_header(&mut state.layer, self.max_long_name)? {
                skip(&mut state.layer, header.size + padding_for(header.size))
                    .map_err(|e| ArchiveError::from_structure_read(e, "entry payload"))?;
                skipped += 1;
            }
        }

        // Reaching the end validates cipher padding and the zstd frame.
        let trailing = io::copy(&mut state.layer, &mut io::sink())
            .map_err(|e| ArchiveError::from_structure_read(e, "archive trailer"))?;

        let mut input = state.layer.into_decoder().finish();
        let raw_trailing = match io::copy(&mut input, &mut io::sink()) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => 0,
            Err(e) => return Err(e.into()),
        };

        info!(
            target: "strata::backup",
            entries = self.entries_read,
            skipped,
            trailing,
            raw_trailing,
            "Closed backup archive"
        );
        Ok(())
    }

    /// Manifest records, in the order they were written
    pub fn assets(&self) -> &[AssetRecord] {
        &self.assets
    }

    /// When the archive was created
    pub fn backup_date(&self) -> DateTime<Utc> {
        self.backup_date
    }

    /// Whether the archive is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Number of entries yielded so far
    pub fn entries_read(&self) -> u64 {
        self.entries_read
    }

    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.state.is_none()
    }
}

impl<R: Read> Drop for ArchiveReader<R> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(target: "strata::backup", error = %e, "Failed to close archive reader on drop");
        }
    }
}

impl<R: Read> fmt::Debug for ArchiveReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("assets", &self.assets.len())
            .field("backup_date", &self.backup_date)
            .field("encrypted", &self.encrypted)
            .field("entries_read", &self.entries_read)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Payload stream of the current entry
pub struct EntryStream<'a, R: Read> {
    layer: &'a mut ReadLayer<R>,
    remaining: &'a mut u64,
}

impl<R: Read> Read for EntryStream<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if *self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = (buf.len() as u64).min(*self.remaining) as usize;
        let n = self.layer.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive ended inside an entry",
            ));
        }
        *self.remaining -= n as u64;
        Ok(n)
    }
}

/// Asset backed by the live archive entry
///
/// Borrows the reader session, so only one entry is live at a time.
/// Disposing it releases the entry, not the archive.
pub struct EntryAsset<'a, R: Read> {
    record: AssetRecord,
    size: u64,
    mtime: u64,
    stream: Option<EntryStream<'a, R>>,
}

impl<R: Read> EntryAsset<'_, R> {
    /// Manifest record matched by this entry
    pub fn record(&self) -> &AssetRecord {
        &self.record
    }

    /// Entry modification time, seconds since the Unix epoch
    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    /// Entry modification time as a timestamp
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.mtime)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// Read the remaining payload into memory
    pub fn read_to_vec(&mut self) -> ArchiveResult<Vec<u8>> {
        let mut data = Vec::with_capacity(self.size.min(1 << 20) as usize);
        self.open()?
            .read_to_end(&mut data)
            .map_err(|e| ArchiveError::from_structure_read(e, "entry payload"))?;
        Ok(data)
    }
}

impl<R: Read> Asset for EntryAsset<'_, R> {
    fn class_id(&self) -> ClassId {
        self.record.class_id
    }

    fn name(&self) -> &str {
        &self.record.name
    }

    fn payload_len(&self) -> Option<u64> {
        Some(self.size)
    }

    fn open(&mut self) -> AssetResult<&mut dyn Read> {
        match self.stream.as_mut() {
            Some(stream) => Ok(stream),
            None => Err(AssetError::disposed(self.record.name.clone())),
        }
    }

    fn dispose(&mut self) {
        self.stream = None;
    }

    fn is_disposed(&self) -> bool {
        self.stream.is_none()
    }
}

impl<R: Read> fmt::Debug for EntryAsset<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryAsset")
            .field("class_id", &self.record.class_id)
            .field("name", &self.record.name)
            .field("size", &self.size)
            .field("mtime", &self.mtime)
            .field("disposed", &self.stream.is_none())
            .finish()
    }
}
