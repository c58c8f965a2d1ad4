//! Tar entry multiplexing
//!
//! Assets are stored as sequential tar entries inside the innermost layer.
//! Each entry is a GNU header carrying the asset key as its path, the
//! payload length and a modification time, followed by the payload and
//! zero padding to the next 512-byte block. Keys longer than the 100-byte
//! name field are preceded by a GNU long-name (`L`) entry. Two zero blocks
//! end the stream.
//!
//! Headers are built with the `tar` crate and written through
//! [`tar::Builder`]. Reading walks the blocks directly so the reader session
//! can own the stream and hand out one live entry at a time.

use crate::error::{ArchiveError, ArchiveResult};
use std::io::{self, Read, Write};
use strata_backup_core::AssetKey;
use tar::{Builder, EntryType, Header};
use tracing::debug;

/// Tar block size
pub const BLOCK_SIZE: u64 = 512;

const NAME_FIELD_LEN: usize = 100;
const LONG_LINK_NAME: &[u8] = b"././@LongLink";
const CHECKSUM_RANGE: std::ops::Range<usize> = 148..156;

/// Header fields of one asset entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Entry key, `"{class_id}/{name}"`
    pub key: String,
    /// Payload length in bytes
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: u64,
}

/// Zero bytes following a payload of `size` bytes
pub fn padding_for(size: u64) -> u64 {
    (BLOCK_SIZE - size % BLOCK_SIZE) % BLOCK_SIZE
}

/// Append one entry, streaming exactly `len` bytes from `data`
///
/// Fails with `UnexpectedEof` if `data` ends early. Bytes past `len`
/// are not read.
pub fn append_entry<W: Write>(
    builder: &mut Builder<W>,
    key: &AssetKey,
    mtime: u64,
    len: u64,
    data: &mut dyn Read,
) -> io::Result<()> {
    let key = key.as_bytes();

    if key.len() > NAME_FIELD_LEN {
        let mut long = new_header(EntryType::GNULongName, key.len() as u64 + 1, mtime);
        set_name(&mut long, LONG_LINK_NAME);
        long.set_cksum();

        let mut name = Vec::with_capacity(key.len() + 1);
        name.extend_from_slice(key);
        name.push(0);
        builder.append(&long, name.as_slice())?;
    }

    let mut header = new_header(EntryType::Regular, len, mtime);
    set_name(&mut header, &key[..key.len().min(NAME_FIELD_LEN)]);
    header.set_cksum();
    builder.append(&header, ExactReader::new(data, len))
}

fn new_header(kind: EntryType, size: u64, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_size(size);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(mtime);
    header
}

fn set_name(header: &mut Header, name: &[u8]) {
    header.as_old_mut().name[..name.len()].copy_from_slice(name);
}

/// Reader yielding exactly `remaining` bytes or an error
struct ExactReader<'a> {
    inner: &'a mut dyn Read,
    remaining: u64,
}

impl<'a> ExactReader<'a> {
    fn new(inner: &'a mut dyn Read, len: u64) -> Self {
        Self {
            inner,
            remaining: len,
        }
    }
}

impl Read for ExactReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("asset payload ended {} bytes early", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Read the next asset entry header
///
/// Consumes GNU long-name entries and skips entry types other than regular
/// files. Returns None once the end-of-archive marker has been read. The
/// stream is left positioned at the start of the entry's payload.
pub fn read_entry_header<R: Read>(
    input: &mut R,
    max_long_name: u64,
) -> ArchiveResult<Option<EntryHeader>> {
    let mut long_name: Option<Vec<u8>> = None;
    let mut block = [0u8; BLOCK_SIZE as usize];

    loop {
        input
            .read_exact(&mut block)
            .map_err(|e| ArchiveError::from_structure_read(e, "entry header"))?;

        if block.iter().all(|b| *b == 0) {
            // Second terminator block; a missing one is tolerated.
            match input.read_exact(&mut block) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                Err(e) => {
                    return Err(ArchiveError::from_structure_read(
                        e,
                        "end-of-archive marker",
                    ))
                }
            }
            return Ok(None);
        }

        let header = Header::from_byte_slice(&block);
        verify_checksum(header, &block)?;

        let size = header
            .entry_size()
            .map_err(|e| ArchiveError::invalid_format(format!("entry size: {}", e)))?;

        match header.entry_type() {
            EntryType::GNULongName => {
                if size > max_long_name {
                    return Err(ArchiveError::invalid_format(format!(
                        "long name of {} bytes exceeds limit {}",
                        size, max_long_name
                    )));
                }
                let mut name = vec![0u8; size as usize];
                input
                    .read_exact(&mut name)
                    .map_err(|e| ArchiveError::from_structure_read(e, "long name"))?;
                skip(input, padding_for(size))
                    .map_err(|e| ArchiveError::from_structure_read(e, "long name"))?;
                while name.last() == Some(&0) {
                    name.pop();
                }
                long_name = Some(name);
            }
            EntryType::Regular | EntryType::Continuous => {
                let raw = match long_name.take() {
                    Some(name) => name,
                    None => header.path_bytes().into_owned(),
                };
                let key = String::from_utf8(raw)
                    .map_err(|_| ArchiveError::invalid_format("entry key is not UTF-8"))?;
                let mtime = header
                    .mtime()
                    .map_err(|e| ArchiveError::invalid_format(format!("entry mtime: {}", e)))?;
                return Ok(Some(EntryHeader { key, size, mtime }));
            }
            other => {
                debug!(target: "strata::backup", entry_type = ?other, size, "Skipping non-file tar entry");
                long_name = None;
                skip(input, size + padding_for(size))
                    .map_err(|e| ArchiveError::from_structure_read(e, "entry payload"))?;
            }
        }
    }
}

fn verify_checksum(header: &Header, block: &[u8; BLOCK_SIZE as usize]) -> ArchiveResult<()> {
    let stored = header
        .cksum()
        .map_err(|e| ArchiveError::invalid_format(format!("entry checksum field: {}", e)))?;
    let computed: u32 = block
        .iter()
        .enumerate()
        .map(|(i, b)| {
            if CHECKSUM_RANGE.contains(&i) {
                u32::from(b' ')
            } else {
                u32::from(*b)
            }
        })
        .sum();
    if stored != computed {
        return Err(ArchiveError::invalid_format(format!(
            "entry header checksum mismatch: stored {}, computed {}",
            stored, computed
        )));
    }
    Ok(())
}

/// Discard exactly `n` bytes
pub fn skip<R: Read>(input: &mut R, n: u64) -> io::Result<()> {
    let skipped = io::copy(&mut input.by_ref().take(n), &mut io::sink())?;
    if skipped < n {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stream ended inside an entry",
        ));
    }
    Ok(())
}
