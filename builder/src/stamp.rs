// Licensed under the Apache-2.0 license

//! Writes the payload length and HMAC-SHA-256 into the image header.

use crate::error::{ReleaseError, Result};
use hmac::{Hmac, Mac};
use image_layout::{ImageHeader, HASH_SIZE, PAYLOAD_OFFSET};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub length: u32,
    pub hash: [u8; HASH_SIZE],
}

fn keyed_mac(key: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key)
        .map_err(|e| ReleaseError::CryptoFailure(format!("HMAC key rejected: {e}")))
}

pub fn payload_hash(key: &[u8], payload: &[u8]) -> Result<[u8; HASH_SIZE]> {
    let mut mac = keyed_mac(key)?;
    mac.update(payload);
    let mut hash = [0u8; HASH_SIZE];
    hash.copy_from_slice(&mac.finalize().into_bytes());
    Ok(hash)
}

/// Stamps `image` in place. Must run before padding: the length field and the
/// hash cover the payload as built, never the fill bytes.
///
/// The header itself lies outside the hashed range, so stamping an already
/// stamped image writes the same values again.
pub fn stamp_image(key: &[u8], image: &mut [u8]) -> Result<Stamp> {
    let len = image.len();
    if len < PAYLOAD_OFFSET {
        return Err(ReleaseError::ImageTooSmall {
            len,
            min: PAYLOAD_OFFSET,
        });
    }
    let length = u32::try_from(len - PAYLOAD_OFFSET)
        .map_err(|_| ReleaseError::ImageTooLarge { len })?;
    let hash = payload_hash(key, &image[PAYLOAD_OFFSET..])?;

    let header = ImageHeader::read_from_image_mut(image).ok_or(ReleaseError::ImageTooSmall {
        len,
        min: PAYLOAD_OFFSET,
    })?;
    header.length.set(length);
    header.hash = hash;
    Ok(Stamp { length, hash })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StampCheck {
    pub length: u32,
    pub hash_matches: bool,
}

/// Recomputes the hash over the `length` payload bytes named by the header,
/// so padded images verify too.
pub fn verify_stamp(key: &[u8], image: &[u8]) -> Result<StampCheck> {
    let header = ImageHeader::read_from_image(image).ok_or(ReleaseError::ImageTooSmall {
        len: image.len(),
        min: PAYLOAD_OFFSET,
    })?;
    let length = header.length.get();
    let Some(payload) = PAYLOAD_OFFSET
        .checked_add(length as usize)
        .and_then(|end| image.get(PAYLOAD_OFFSET..end))
    else {
        return Ok(StampCheck {
            length,
            hash_matches: false,
        });
    };
    let mut mac = keyed_mac(key)?;
    mac.update(payload);
    Ok(StampCheck {
        length,
        hash_matches: mac.verify_slice(&header.hash).is_ok(),
    })
}
