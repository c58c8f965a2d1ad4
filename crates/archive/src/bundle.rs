//! One-shot archive operations
//!
//! Convenience wrappers over the writer and reader sessions: write a whole
//! asset list, write atomically to a file, and verify an archive end to end.

use crate::config::{ArchiveOptions, Passphrase};
use crate::error::{ArchiveError, ArchiveResult};
use crate::reader::ArchiveReader;
use crate::writer::ArchiveWriter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use strata_backup_core::Asset;
use tracing::info;
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

/// Result of a file backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    /// Where the archive was written
    pub path: PathBuf,
    /// Number of assets in the archive
    pub asset_count: u64,
    /// Size of the archive file in bytes
    pub size_bytes: u64,
    /// xxh3 checksum of the archive file
    pub checksum: String,
}

/// Result of a full verification pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    /// When the archive was created
    pub backup_date: DateTime<Utc>,
    /// Records in the manifest
    pub asset_count: u64,
    /// Entries present in the body
    pub entries_read: u64,
    /// Total payload bytes across all entries
    pub payload_bytes: u64,
    /// Whether the archive is encrypted
    pub encrypted: bool,
}

/// Write every asset in `assets`, in order, and finish the archive
pub fn write_archive<W: Write, A: Asset>(
    output: W,
    assets: &mut [A],
    options: &ArchiveOptions,
) -> ArchiveResult<W> {
    let mut writer = ArchiveWriter::create(output, assets, options)?;
    for asset in assets.iter_mut() {
        writer.write_asset_entry(asset)?;
    }
    writer.into_inner()
}

/// Write a backup archive to `path`
///
/// Either the complete archive is written or no file is left behind: the
/// archive goes to a temporary sibling first and is renamed into place.
pub fn backup_to_path<A: Asset>(
    path: &Path,
    assets: &mut [A],
    options: &ArchiveOptions,
) -> ArchiveResult<BackupInfo> {
    let temp_path = temp_path_for(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    match write_file(&temp_path, assets, options) {
        Ok(()) => {
            fs::rename(&temp_path, path)?;
        }
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
    }

    let size_bytes = fs::metadata(path)?.len();
    let checksum = file_checksum(path)?;

    info!(
        target: "strata::backup",
        path = %path.display(),
        assets = assets.len(),
        size_bytes,
        %checksum,
        "Backup written"
    );

    Ok(BackupInfo {
        path: path.to_path_buf(),
        asset_count: assets.len() as u64,
        size_bytes,
        checksum,
    })
}

/// Sibling temp path, `<file name>.tmp`
fn temp_path_for(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("backup path {} has no file name", path.display()),
        )
    })?;
    let mut temp_name = name.to_os_string();
    temp_name.push(".tmp");
    Ok(path.with_file_name(temp_name))
}

fn write_file<A: Asset>(
    path: &Path,
    assets: &mut [A],
    options: &ArchiveOptions,
) -> ArchiveResult<()> {
    let file = File::create(path)?;
    let output = write_archive(BufWriter::new(file), assets, options)?;
    let file = output
        .into_inner()
        .map_err(|e| ArchiveError::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

/// Read an archive end to end, checking every entry against the manifest
///
/// Fails with [`ArchiveError::InvalidFormat`] if a manifest record has no
/// entry, in addition to everything [`ArchiveReader`] rejects.
pub fn verify_archive<R: Read>(
    input: R,
    passphrase: Option<&Passphrase>,
) -> ArchiveResult<ArchiveSummary> {
    let mut reader = ArchiveReader::open(input, passphrase)?;
    let keys: Vec<_> = reader.assets().iter().map(|r| r.key()).collect();
    let mut seen = vec![false; keys.len()];
    let mut payload_bytes = 0u64;

    while let Some(mut entry) = reader.next_entry()? {
        // Entries match the first record sharing their key.
        let key = entry.key();
        if let Some(index) = keys.iter().position(|k| *k == key) {
            seen[index] = true;
        }
        payload_bytes += io::copy(entry.open()?, &mut io::sink())
            .map_err(|e| ArchiveError::from_structure_read(e, "entry payload"))?;
    }

    for (index, key) in keys.iter().enumerate() {
        if !seen[index] && !keys[..index].contains(key) {
            return Err(ArchiveError::invalid_format(format!(
                "manifest entry {} has no archive entry",
                key
            )));
        }
    }

    let summary = ArchiveSummary {
        backup_date: reader.backup_date(),
        asset_count: keys.len() as u64,
        entries_read: reader.entries_read(),
        payload_bytes,
        encrypted: reader.is_encrypted(),
    };
    reader.close()?;
    Ok(summary)
}

/// Compute the xxh3 hex digest of a byte slice
pub fn xxh3_hex(data: &[u8]) -> String {
    format!("{:016x}", xxh3_64(data))
}

/// Compute the xxh3 hex digest of a file, streaming
pub fn file_checksum(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Xxh3::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:016x}", hasher.digest()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use strata_backup_core::{ClassId, MemoryAsset};
    use tempfile::tempdir;

    fn sample_assets() -> Vec<MemoryAsset> {
        let id = ClassId::new();
        vec![
            MemoryAsset::new(id, "settings", b"{\"theme\":\"dark\"}".to_vec()),
            MemoryAsset::new(id, "notes", b"remember the milk".to_vec()),
        ]
    }

    #[test]
    fn test_write_then_verify() {
        let mut assets = sample_assets();
        let data = write_archive(Vec::new(), &mut assets, &ArchiveOptions::for_testing()).unwrap();

        let summary = verify_archive(Cursor::new(data), None).unwrap();
        assert_eq!(summary.asset_count, 2);
        assert_eq!(summary.entries_read, 2);
        assert_eq!(summary.payload_bytes, 16 + 17);
        assert!(!summary.encrypted);
    }

    #[test]
    fn test_verify_missing_entry() {
        let mut assets = sample_assets();
        let mut writer =
            ArchiveWriter::create(Vec::new(), &assets, &ArchiveOptions::for_testing()).unwrap();
        writer.write_asset_entry(&mut assets[0]).unwrap();
        let data = writer.into_inner().unwrap();

        let err = verify_archive(Cursor::new(data), None).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidFormat(_)));
    }

    #[test]
    fn test_backup_to_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("daily.strata-backup");
        let mut assets = sample_assets();

        let info = backup_to_path(&path, &mut assets, &ArchiveOptions::for_testing()).unwrap();
        assert_eq!(info.path, path);
        assert_eq!(info.asset_count, 2);
        assert_eq!(info.size_bytes, fs::metadata(&path).unwrap().len());
        assert_eq!(info.checksum, xxh3_hex(&fs::read(&path).unwrap()));
        assert!(!temp_path_for(&path).unwrap().exists());

        let summary = verify_archive(File::open(&path).unwrap(), None).unwrap();
        assert_eq!(summary.entries_read, 2);
    }

    #[test]
    fn test_backup_to_path_cleans_up_on_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.strata-backup");
        let mut assets = sample_assets();
        assets[1].dispose();

        let err = backup_to_path(&path, &mut assets, &ArchiveOptions::for_testing()).unwrap_err();
        assert!(matches!(err, ArchiveError::Asset(_)));
        assert!(!path.exists());
        assert!(!temp_path_for(&path).unwrap().exists());
    }

    #[test]
    fn test_temp_path_keeps_full_name() {
        let dir = tempdir().unwrap();
        let x = temp_path_for(&dir.path().join("a.x")).unwrap();
        let y = temp_path_for(&dir.path().join("a.y")).unwrap();
        assert_ne!(x, y);
        assert_eq!(x.file_name().unwrap(), "a.x.tmp");
        assert!(temp_path_for(Path::new("/")).is_err());
    }

    #[test]
    fn test_verify_with_trailing_bytes() {
        let mut assets = sample_assets();
        let mut data =
            write_archive(Vec::new(), &mut assets, &ArchiveOptions::for_testing()).unwrap();
        data.extend_from_slice(b"trailing junk bytes");

        let summary = verify_archive(Cursor::new(data), None).unwrap();
        assert_eq!(summary.entries_read, 2);
    }

    #[test]
    fn test_summary_serializes() {
        let mut assets = sample_assets();
        let options = ArchiveOptions::for_testing().with_passphrase("s3cret");
        let data = write_archive(Vec::new(), &mut assets, &options).unwrap();

        let summary = verify_archive(Cursor::new(data), Some(&Passphrase::new("s3cret"))).unwrap();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["asset_count"], 2);
        assert_eq!(json["encrypted"], true);
    }

    #[test]
    fn test_xxh3_hex_format() {
        let hex = xxh3_hex(b"backup");
        assert_eq!(hex.len(), 16);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hex, xxh3_hex(b"backup"));
    }
}
