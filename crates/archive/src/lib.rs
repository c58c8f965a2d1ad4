//! Backup archive format for StrataBackup
//!
//! A backup archive is a single zstd-compressed stream:
//!
//! - Header: signature, creation timestamp, asset manifest, IV
//! - Body: one tar entry per asset, keyed `"{class_id}/{name}"`
//! - Optional AES-256-CBC encryption of the body, keyed by passphrase
//!
//! [`ArchiveWriter`] and [`ArchiveReader`] are the streaming sessions;
//! [`write_archive`], [`backup_to_path`] and [`verify_archive`] wrap them
//! for whole-archive use.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bundle; // One-shot write, atomic file backup, verification
mod channel; // Input channel error tagging
pub mod cipher; // Streaming AES-256-CBC filters
pub mod config; // ArchiveOptions, Passphrase
pub mod entry; // Tar entry framing
pub mod error; // ArchiveError
pub mod format; // Header layout and timestamp ticks
pub mod key; // Key derivation and IV generation
pub mod progress; // Progress reporting hook
pub mod reader; // Reader session
pub mod writer; // Writer session

pub use bundle::{
    backup_to_path, file_checksum, verify_archive, write_archive, xxh3_hex, ArchiveSummary,
    BackupInfo,
};
pub use config::{ArchiveConfigError, ArchiveOptions, Passphrase};
pub use error::{ArchiveError, ArchiveResult};
pub use format::{ArchiveHeader, ARCHIVE_EXTENSION, ARCHIVE_MAGIC};
pub use progress::{NoProgress, ProgressSink};
pub use reader::{ArchiveReader, EntryAsset, EntryStream};
pub use writer::ArchiveWriter;
