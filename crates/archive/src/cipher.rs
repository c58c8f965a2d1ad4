//! Streaming AES-256-CBC filters
//!
//! [`CbcWriter`] encrypts everything written through it and appends PKCS7
//! padding on [`CbcWriter::finish`]. [`CbcReader`] decrypts and strips the
//! padding; it holds back one decrypted block until it knows whether that
//! block is the last one.
//!
//! Ciphertext that is not a whole number of blocks, or whose final block
//! carries invalid padding, reads as `UnexpectedEof` / `InvalidData`.

use crate::format::IV_LEN;
use crate::key::ArchiveKey;
use aes::Aes256;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use std::io::{self, Read, Write};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size
pub const BLOCK_LEN: usize = 16;

type Block = [u8; BLOCK_LEN];

/// Encrypting filter over a writer
pub struct CbcWriter<W: Write> {
    inner: W,
    cipher: Aes256CbcEnc,
    pending: Block,
    pending_len: usize,
}

impl<W: Write> CbcWriter<W> {
    /// Wrap `inner`, encrypting with `key` and `iv`
    pub fn new(inner: W, key: &ArchiveKey, iv: &[u8; IV_LEN]) -> Self {
        Self {
            inner,
            cipher: Aes256CbcEnc::new(&(*key).into(), &(*iv).into()),
            pending: [0; BLOCK_LEN],
            pending_len: 0,
        }
    }

    fn encrypt_into(&mut self, mut block: Block, out: &mut Vec<u8>) {
        self.cipher
            .encrypt_block_mut(GenericArray::from_mut_slice(&mut block));
        out.extend_from_slice(&block);
    }

    /// Write the padded final block and return the inner writer
    pub fn finish(mut self) -> io::Result<W> {
        let pad = BLOCK_LEN - self.pending_len;
        let mut block = self.pending;
        block[self.pending_len..].fill(pad as u8);

        let mut out = Vec::with_capacity(BLOCK_LEN);
        self.encrypt_into(block, &mut out);
        self.inner.write_all(&out)?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    /// Get a reference to the inner writer
    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

impl<W: Write> Write for CbcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = Vec::with_capacity(buf.len() + BLOCK_LEN);
        let mut input = buf;

        if self.pending_len > 0 {
            let take = (BLOCK_LEN - self.pending_len).min(input.len());
            self.pending[self.pending_len..self.pending_len + take]
                .copy_from_slice(&input[..take]);
            self.pending_len += take;
            input = &input[take..];

            if self.pending_len < BLOCK_LEN {
                return Ok(buf.len());
            }
            let block = self.pending;
            self.pending_len = 0;
            self.encrypt_into(block, &mut out);
        }

        let mut chunks = input.chunks_exact(BLOCK_LEN);
        for chunk in &mut chunks {
            let mut block = [0u8; BLOCK_LEN];
            block.copy_from_slice(chunk);
            self.encrypt_into(block, &mut out);
        }

        let rest = chunks.remainder();
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();

        self.inner.write_all(&out)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // A partial block stays buffered until finish.
        self.inner.flush()
    }
}

/// Decrypting filter over a reader
pub struct CbcReader<R: Read> {
    inner: R,
    cipher: Aes256CbcDec,
    plain: Block,
    pos: usize,
    len: usize,
    held: Option<Block>,
    eof: bool,
}

impl<R: Read> CbcReader<R> {
    /// Wrap `inner`, decrypting with `key` and `iv`
    pub fn new(inner: R, key: &ArchiveKey, iv: &[u8; IV_LEN]) -> Self {
        Self {
            inner,
            cipher: Aes256CbcDec::new(&(*key).into(), &(*iv).into()),
            plain: [0; BLOCK_LEN],
            pos: 0,
            len: 0,
            held: None,
            eof: false,
        }
    }

    /// Return the inner reader
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read one whole ciphertext block, or None at a clean end
    fn read_block(&mut self) -> io::Result<Option<Block>> {
        let mut block = [0u8; BLOCK_LEN];
        let mut filled = 0;
        while filled < BLOCK_LEN {
            match self.inner.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        match filled {
            0 => Ok(None),
            BLOCK_LEN => Ok(Some(block)),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "ciphertext is not a multiple of the block size",
            )),
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        loop {
            match self.read_block()? {
                Some(mut block) => {
                    self.cipher
                        .decrypt_block_mut(GenericArray::from_mut_slice(&mut block));
                    if let Some(previous) = self.held.replace(block) {
                        self.plain = previous;
                        self.pos = 0;
                        self.len = BLOCK_LEN;
                        return Ok(());
                    }
                }
                None => {
                    self.eof = true;
                    let last = self.held.take().ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "ciphertext ended before the final block",
                        )
                    })?;
                    let pad = last[BLOCK_LEN - 1] as usize;
                    let valid = (1..=BLOCK_LEN).contains(&pad)
                        && last[BLOCK_LEN - pad..].iter().all(|b| *b as usize == pad);
                    if !valid {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "invalid PKCS7 padding",
                        ));
                    }
                    self.plain = last;
                    self.pos = 0;
                    self.len = BLOCK_LEN - pad;
                    return Ok(());
                }
            }
        }
    }
}

impl<R: Read> Read for CbcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos == self.len {
            if self.eof {
                return Ok(0);
            }
            self.fill()?;
        }
        let n = (self.len - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::block_padding::Pkcs7;
    use std::io::Cursor;

    const KEY: ArchiveKey = [7u8; 32];
    const IV: [u8; IV_LEN] = [9u8; IV_LEN];

    fn encrypt(data: &[u8], write_size: usize) -> Vec<u8> {
        let mut writer = CbcWriter::new(Vec::new(), &KEY, &IV);
        for chunk in data.chunks(write_size.max(1)) {
            writer.write_all(chunk).unwrap();
        }
        writer.finish().unwrap()
    }

    fn decrypt(data: &[u8]) -> io::Result<Vec<u8>> {
        let mut reader = CbcReader::new(Cursor::new(data.to_vec()), &KEY, &IV);
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_matches_one_shot_cbc() {
        let data: Vec<u8> = (0..100u8).collect();
        let streamed = encrypt(&data, 7);

        let mut buf = vec![0u8; data.len() + BLOCK_LEN];
        let one_shot = Aes256CbcEnc::new(&KEY.into(), &IV.into())
            .encrypt_padded_b2b_mut::<Pkcs7>(&data, &mut buf)
            .unwrap();
        assert_eq!(streamed, one_shot);
    }

    #[test]
    fn test_roundtrip_various_lengths() {
        for len in [0usize, 1, 15, 16, 17, 31, 32, 33, 1000] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            for write_size in [1usize, 5, 16, 64] {
                let ct = encrypt(&data, write_size);
                assert_eq!(ct.len() % BLOCK_LEN, 0);
                assert!(ct.len() > data.len());
                assert_eq!(decrypt(&ct).unwrap(), data, "len={}", len);
            }
        }
    }

    #[test]
    fn test_full_padding_block_for_aligned_input() {
        let ct = encrypt(&[1u8; 32], 32);
        assert_eq!(ct.len(), 48);
    }

    #[test]
    fn test_truncated_ciphertext() {
        let mut ct = encrypt(b"some secret payload", 4);
        ct.truncate(ct.len() - 3);
        let err = decrypt(&ct).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_empty_ciphertext() {
        let err = decrypt(&[]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_wrong_key_yields_garbage_or_bad_padding() {
        let data = b"STRATA_BAK and then some more text to span blocks";
        let ct = encrypt(data, 16);

        let mut reader = CbcReader::new(Cursor::new(ct), &[1u8; 32], &IV);
        let mut out = Vec::new();
        match reader.read_to_end(&mut out) {
            Ok(_) => assert_ne!(out.as_slice(), &data[..]),
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::InvalidData),
        }
    }

    #[test]
    fn test_partial_reads() {
        let data: Vec<u8> = (0..=255u8).collect();
        let ct = encrypt(&data, 100);
        let mut reader = CbcReader::new(Cursor::new(ct), &KEY, &IV);

        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, data);
    }
}
