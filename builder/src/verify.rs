// Licensed under the Apache-2.0 license

//! Producer-side check of a finished image: header fields, padding and the
//! keyed hash. Reads `.gbin` files by decrypting them first.

use crate::config::KeyMaterial;
use crate::encrypt;
use crate::error::{ReleaseError, Result};
use crate::stamp::verify_stamp;
use image_layout::{ImageHeader, FILL_BYTE, PAYLOAD_OFFSET};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReport {
    pub image_len: usize,
    pub has_magic: bool,
    pub header_version: (u32, u32),
    pub fw_version: (u8, u8, u8, u16),
    pub payload_length: u32,
    pub hash_matches: bool,
    pub padding: usize,
    pub padding_is_fill: bool,
    pub aligned: bool,
}

impl ImageReport {
    pub fn is_valid(&self) -> bool {
        self.hash_matches && self.padding_is_fill && self.aligned
    }
}

impl fmt::Display for ImageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor, patch, dev_build) = self.fw_version;
        writeln!(f, "image length:   {:#x}", self.image_len)?;
        writeln!(
            f,
            "magic word:     {}",
            if self.has_magic { "ok" } else { "missing" }
        )?;
        writeln!(
            f,
            "header version: {}.{}",
            self.header_version.0, self.header_version.1
        )?;
        writeln!(f, "fw version:     {major}.{minor}.{patch}-{dev_build:03}")?;
        writeln!(f, "payload length: {:#x}", self.payload_length)?;
        writeln!(
            f,
            "padding:        {:#x} bytes{}{}",
            self.padding,
            if self.padding_is_fill { "" } else { ", not erased" },
            if self.aligned { "" } else { ", unaligned" }
        )?;
        write!(
            f,
            "hash:           {}",
            if self.hash_matches { "ok" } else { "MISMATCH" }
        )
    }
}

pub fn inspect_image(hmac_key: &[u8], image: &[u8], block_size: usize) -> Result<ImageReport> {
    let header = ImageHeader::read_from_image(image).ok_or(ReleaseError::ImageTooSmall {
        len: image.len(),
        min: PAYLOAD_OFFSET,
    })?;
    let check = verify_stamp(hmac_key, image)?;
    let payload_end = PAYLOAD_OFFSET.saturating_add(check.length as usize);
    let trailer = image.get(payload_end..).unwrap_or_default();

    Ok(ImageReport {
        image_len: image.len(),
        has_magic: header.has_magic(),
        header_version: header.header_version(),
        fw_version: header.fw_version(),
        payload_length: check.length,
        hash_matches: check.hash_matches,
        padding: trailer.len(),
        padding_is_fill: trailer.iter().all(|&b| b == FILL_BYTE),
        aligned: block_size != 0 && image.len() % block_size == 0,
    })
}

pub fn verify_file(
    keys: &KeyMaterial,
    path: &Path,
    block_size: usize,
    encrypted: bool,
) -> Result<ImageReport> {
    let mut image = std::fs::read(path).map_err(ReleaseError::open("image", path))?;
    if encrypted {
        encrypt::apply_keystream(&keys.aes_key, &keys.aes_iv, &mut image)?;
    }
    inspect_image(&keys.hmac_key, &image, block_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::finalize_image;
    use image_layout::{HEADER_OFFSET, MAGIC_WORD};

    const KEY: &[u8] = b"verify-key";

    fn finished() -> Vec<u8> {
        let mut raw = vec![0u8; 0x3A0];
        raw[HEADER_OFFSET..HEADER_OFFSET + 4].copy_from_slice(&MAGIC_WORD.to_le_bytes());
        raw[HEADER_OFFSET + 4] = 1;
        raw[HEADER_OFFSET + 0x30..HEADER_OFFSET + 0x35].copy_from_slice(&[1, 0, 0, 38, 0]);
        raw[0x390] = 0xC3;
        finalize_image(KEY, 1024, raw).unwrap().0
    }

    #[test]
    fn test_inspect_finished_image() {
        let report = inspect_image(KEY, &finished(), 1024).unwrap();
        assert!(report.is_valid());
        assert!(report.has_magic);
        assert_eq!(report.header_version, (1, 0));
        assert_eq!(report.fw_version, (1, 0, 0, 38));
        assert_eq!(report.payload_length, 0x20);
        assert_eq!(report.padding, 1024 - 0x3A0);
        assert!(report.to_string().contains("fw version:     1.0.0-038"));
    }

    #[test]
    fn test_inspect_detects_tampering() {
        let mut image = finished();
        image[0x391] ^= 0x80;
        let report = inspect_image(KEY, &image, 1024).unwrap();
        assert!(!report.hash_matches);
        assert!(!report.is_valid());

        let mut image = finished();
        *image.last_mut().unwrap() = 0;
        assert!(!inspect_image(KEY, &image, 1024).unwrap().padding_is_fill);

        let image = finished();
        assert!(!inspect_image(KEY, &image[..1000], 1024).unwrap().aligned);
    }

    #[test]
    fn test_verify_encrypted_file() {
        let keys = KeyMaterial {
            aes_key: vec![7; 32],
            aes_iv: vec![9; 16],
            hmac_key: KEY.to_vec(),
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.gbin");
        let image = finished();
        std::fs::write(&path, encrypt::encrypt(&keys.aes_key, &keys.aes_iv, &image).unwrap())
            .unwrap();

        assert!(verify_file(&keys, &path, 1024, true).unwrap().is_valid());
        assert!(!verify_file(&keys, &path, 1024, false).unwrap().is_valid());
        assert!(matches!(
            verify_file(&keys, &dir.path().join("nope.gbin"), 1024, true),
            Err(ReleaseError::NotFound { .. })
        ));
    }
}
