//! Archive header format
//!
//! # Binary Format
//!
//! Everything below is inside the zstd frame. All integers are little-endian.
//!
//! ```text
//! magic:        [u8; 10]  "STRATA_BAK"
//! created:      i64       UTC ticks (100ns units since 0001-01-01T00:00:00Z)
//! asset_count:  i64
//! records:      [AssetRecord; asset_count]  272 bytes each
//! iv:           [u8; 16]  all-zero => unencrypted
//! ```
//!
//! When the IV is non-zero, the rest of the stream is AES-256-CBC and
//! starts with the magic again as a passphrase check.

use crate::error::{ArchiveError, ArchiveResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use std::io::{self, Read, Write};
use strata_backup_core::{AssetRecord, ASSET_RECORD_LEN};

/// Format signature at the start of every archive
pub const ARCHIVE_MAGIC: &[u8; 10] = b"STRATA_BAK";

/// Length of the IV slot
pub const IV_LEN: usize = 16;

/// IV slot value marking an unencrypted archive
pub const UNENCRYPTED_IV: [u8; IV_LEN] = [0; IV_LEN];

/// Ticks per second (one tick is 100ns)
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Tick count of 1970-01-01T00:00:00Z
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// File extension for backup archives
pub const ARCHIVE_EXTENSION: &str = ".strata-backup";

/// Convert a UTC timestamp to ticks, saturating at the i64 range
pub fn to_ticks(at: DateTime<Utc>) -> i64 {
    let secs = at.timestamp();
    let sub_ticks = i64::from(at.timestamp_subsec_nanos()) / 100;
    UNIX_EPOCH_TICKS
        .saturating_add(secs.saturating_mul(TICKS_PER_SECOND))
        .saturating_add(sub_ticks)
}

/// Convert ticks back to a UTC timestamp
///
/// Returns None if the value is outside the representable range.
pub fn from_ticks(ticks: i64) -> Option<DateTime<Utc>> {
    let since_epoch = ticks.checked_sub(UNIX_EPOCH_TICKS)?;
    let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = since_epoch.rem_euclid(TICKS_PER_SECOND) * 100;
    DateTime::from_timestamp(secs, nanos as u32)
}

/// Decoded archive header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    /// Creation time as ticks
    pub created_ticks: i64,
    /// Manifest records in write order
    pub records: Vec<AssetRecord>,
    /// IV slot
    pub iv: [u8; IV_LEN],
}

impl ArchiveHeader {
    /// Whether the IV slot marks the archive as encrypted
    pub fn is_encrypted(&self) -> bool {
        self.iv != UNENCRYPTED_IV
    }

    /// Creation time, if the tick value is representable
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        from_ticks(self.created_ticks)
    }

    /// Write the header, magic through IV
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(ARCHIVE_MAGIC)?;
        out.write_i64::<LittleEndian>(self.created_ticks)?;
        out.write_i64::<LittleEndian>(self.records.len() as i64)?;
        for record in &self.records {
            out.write_all(&record.to_bytes())?;
        }
        out.write_all(&self.iv)
    }

    /// Read and validate a header, magic through IV
    ///
    /// `max_records` bounds the declared asset count before any record
    /// is read.
    pub fn read_from<R: Read>(input: &mut R, max_records: u64) -> ArchiveResult<Self> {
        if !read_magic(input).map_err(|e| ArchiveError::from_structure_read(e, "signature"))? {
            return Err(ArchiveError::invalid_format("signature mismatch"));
        }

        let created_ticks = input
            .read_i64::<LittleEndian>()
            .map_err(|e| ArchiveError::from_structure_read(e, "timestamp"))?;
        let count = input
            .read_i64::<LittleEndian>()
            .map_err(|e| ArchiveError::from_structure_read(e, "asset count"))?;

        let count = u64::try_from(count)
            .map_err(|_| ArchiveError::invalid_format(format!("negative asset count {}", count)))?;
        if count > max_records {
            return Err(ArchiveError::invalid_format(format!(
                "asset count {} exceeds limit {}",
                count, max_records
            )));
        }

        let mut records = Vec::with_capacity(count.min(1024) as usize);
        let mut slot = [0u8; ASSET_RECORD_LEN];
        for index in 0..count {
            input
                .read_exact(&mut slot)
                .map_err(|e| ArchiveError::from_structure_read(e, "manifest"))?;
            let record = AssetRecord::from_bytes(&slot).ok_or_else(|| {
                ArchiveError::invalid_format(format!("manifest record {} name is not UTF-8", index))
            })?;
            records.push(record);
        }

        let mut iv = [0u8; IV_LEN];
        input
            .read_exact(&mut iv)
            .map_err(|e| ArchiveError::from_structure_read(e, "IV"))?;

        Ok(Self {
            created_ticks,
            records,
            iv,
        })
    }
}

/// Read the magic signature and report whether it matched
pub fn read_magic<R: Read>(input: &mut R) -> io::Result<bool> {
    let mut magic = [0u8; ARCHIVE_MAGIC.len()];
    input.read_exact(&mut magic)?;
    Ok(&magic == ARCHIVE_MAGIC)
}
