//! Passphrase key derivation
//!
//! The archive key is the passphrase's ASCII bytes, truncated or
//! zero-padded to 32 bytes. Characters outside ASCII become `?`.
//!
//! This is not a real KDF: there is no salt and no work factor, so a weak
//! passphrase gives a weak key. It is kept for compatibility with existing
//! archives; moving to an iterated KDF needs a new format signature.

use crate::config::Passphrase;
use crate::format::IV_LEN;
use rand::rngs::OsRng;
use rand::RngCore;

/// AES-256 key length
pub const KEY_LEN: usize = 32;

/// Symmetric archive key
pub type ArchiveKey = [u8; KEY_LEN];

/// Derive the archive key from a passphrase
pub fn derive_key(passphrase: &Passphrase) -> ArchiveKey {
    let mut key = [0u8; KEY_LEN];
    for (slot, ch) in key.iter_mut().zip(passphrase.expose().chars()) {
        *slot = if ch.is_ascii() { ch as u8 } else { b'?' };
    }
    key
}

/// Generate a random IV for a new archive
///
/// The all-zero IV marks an unencrypted archive, so it is never returned.
pub fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    loop {
        OsRng.fill_bytes(&mut iv);
        if iv.iter().any(|b| *b != 0) {
            return iv;
        }
    }
}
