// Licensed under the Apache-2.0 license

//! AES-256 in counter mode. The counter is the full 16-byte IV taken as a
//! big-endian integer, which gives the same keystream as
//! `openssl enc -aes-256-ctr`.

use crate::error::{ReleaseError, Result};
use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;

/// XORs the keystream into `data`. Encryption and decryption are the same
/// operation.
pub fn apply_keystream(key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<()> {
    let mut cipher = Aes256Ctr::new_from_slices(key, iv).map_err(|_| {
        ReleaseError::CryptoFailure(format!(
            "AES-256-CTR needs a {KEY_SIZE}-byte key and a {IV_SIZE}-byte IV, got {} and {}",
            key.len(),
            iv.len()
        ))
    })?;
    cipher
        .try_apply_keystream(data)
        .map_err(|e| ReleaseError::CryptoFailure(e.to_string()))
}

pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut data = plaintext.to_vec();
    apply_keystream(key, iv, &mut data)?;
    Ok(data)
}

pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    encrypt(key, iv, ciphertext)
}
