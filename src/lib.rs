//! StrataBackup - portable backup archives for application assets
//!
//! An application hands a list of assets (class id, name, byte payload) to
//! an [`ArchiveWriter`] and gets back one compressed, optionally encrypted
//! archive. An [`ArchiveReader`] later yields the manifest and then each
//! asset in order.
//!
//! # Quick Start
//!
//! ```ignore
//! use stratabackup::{ArchiveOptions, ArchiveReader, ClassId, MemoryAsset, write_archive};
//!
//! let id = ClassId::new();
//! let mut assets = vec![MemoryAsset::new(id, "settings", b"{}".to_vec())];
//! let data = write_archive(Vec::new(), &mut assets, &ArchiveOptions::new())?;
//!
//! let mut reader = ArchiveReader::open(std::io::Cursor::new(data), None)?;
//! while let Some(mut entry) = reader.next_entry()? {
//!     let payload = entry.read_to_vec()?;
//! }
//! ```

pub use strata_backup_archive::{
    backup_to_path, file_checksum, verify_archive, write_archive, xxh3_hex, ArchiveConfigError,
    ArchiveError, ArchiveHeader, ArchiveOptions, ArchiveReader, ArchiveResult, ArchiveSummary,
    ArchiveWriter, BackupInfo, EntryAsset, EntryStream, NoProgress, Passphrase, ProgressSink,
    ARCHIVE_EXTENSION, ARCHIVE_MAGIC,
};
pub use strata_backup_core::{
    Asset, AssetError, AssetKey, AssetRecord, AssetResult, AssetSource, ClassId, FileAsset,
    LazyAsset, MemoryAsset, ASSET_RECORD_LEN, NAME_FIELD_LEN,
};
