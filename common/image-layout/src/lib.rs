// Licensed under the Apache-2.0 license
#![no_std]

//! Bit-exact layout of the info header that the bootloader reads from a
//! firmware image. Every offset here is relative to the start of the image.

use core::mem::offset_of;
use core::ops::Range;

use zerocopy::{
    byteorder::{LittleEndian, U16, U32},
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
};

pub const HEADER_OFFSET: usize = 0x300;
pub const HEADER_SIZE: usize = 0x80;
pub const LENGTH_OFFSET: usize = HEADER_OFFSET + 12;
pub const HASH_OFFSET: usize = HEADER_OFFSET + 16;
pub const HASH_SIZE: usize = 32;

/// First byte covered by the integrity hash and the encryption.
pub const PAYLOAD_OFFSET: usize = HEADER_OFFSET + HEADER_SIZE;

pub const MAGIC_WORD: u32 = 0x85A1_5BCF;
pub const FILL_BYTE: u8 = 0xFF;
pub const DEFAULT_BLOCK_SIZE: usize = 1024;
pub const DEFAULT_FLASH_START: u32 = 0x0802_0000;

pub const HEADER_RANGE: Range<usize> = HEADER_OFFSET..PAYLOAD_OFFSET;
pub const LENGTH_RANGE: Range<usize> = LENGTH_OFFSET..LENGTH_OFFSET + 4;
pub const HASH_RANGE: Range<usize> = HASH_OFFSET..HASH_OFFSET + HASH_SIZE;

#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ImageHeader {
    pub magic_word: U32<LittleEndian>,
    pub header_major: U32<LittleEndian>,
    pub header_minor: U32<LittleEndian>,
    /// Payload length, excluding everything before `PAYLOAD_OFFSET` and any
    /// padding appended afterwards.
    pub length: U32<LittleEndian>,
    pub hash: [u8; HASH_SIZE],
    pub fw_major: u8,
    pub fw_minor: u8,
    pub fw_patch: u8,
    pub fw_dev_build: U16<LittleEndian>,
    pub reserved: [u8; 75],
}

const _: () = assert!(core::mem::size_of::<ImageHeader>() == HEADER_SIZE);
const _: () = assert!(HEADER_OFFSET + offset_of!(ImageHeader, length) == LENGTH_OFFSET);
const _: () = assert!(HEADER_OFFSET + offset_of!(ImageHeader, hash) == HASH_OFFSET);

impl ImageHeader {
    /// Zero-copy view of the header inside `image`, or `None` when the image
    /// ends before the payload starts.
    pub fn read_from_image(image: &[u8]) -> Option<&ImageHeader> {
        let bytes = image.get(HEADER_RANGE)?;
        ImageHeader::ref_from_bytes(bytes).ok()
    }

    pub fn read_from_image_mut(image: &mut [u8]) -> Option<&mut ImageHeader> {
        let bytes = image.get_mut(HEADER_RANGE)?;
        ImageHeader::mut_from_bytes(bytes).ok()
    }

    pub fn has_magic(&self) -> bool {
        self.magic_word.get() == MAGIC_WORD
    }

    pub fn header_version(&self) -> (u32, u32) {
        (self.header_major.get(), self.header_minor.get())
    }

    pub fn fw_version(&self) -> (u8, u8, u8, u16) {
        (
            self.fw_major,
            self.fw_minor,
            self.fw_patch,
            self.fw_dev_build.get(),
        )
    }
}

/// Number of payload bytes in an image of `image_len` bytes.
pub fn payload_len(image_len: usize) -> Option<usize> {
    image_len.checked_sub(PAYLOAD_OFFSET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_offsets() {
        let mut image = [0u8; PAYLOAD_OFFSET + 4];
        image[LENGTH_RANGE].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        image[HASH_OFFSET] = 0xAA;
        image[HASH_OFFSET + HASH_SIZE - 1] = 0xBB;
        image[HEADER_OFFSET..HEADER_OFFSET + 4].copy_from_slice(&MAGIC_WORD.to_le_bytes());
        image[HEADER_OFFSET + 0x30..HEADER_OFFSET + 0x35].copy_from_slice(&[1, 2, 3, 38, 0]);

        let header = ImageHeader::read_from_image(&image).unwrap();
        assert!(header.has_magic());
        assert_eq!(header.length.get(), 0x1234_5678);
        assert_eq!(header.hash[0], 0xAA);
        assert_eq!(header.hash[HASH_SIZE - 1], 0xBB);
        assert_eq!(header.fw_version(), (1, 2, 3, 38));
    }

    #[test]
    fn test_short_image_has_no_header() {
        assert!(ImageHeader::read_from_image(&[0u8; PAYLOAD_OFFSET - 1]).is_none());
        assert!(ImageHeader::read_from_image(&[0u8; PAYLOAD_OFFSET]).is_some());
        assert_eq!(payload_len(PAYLOAD_OFFSET - 1), None);
        assert_eq!(payload_len(0x400), Some(0x80));
    }

    #[test]
    fn test_mutable_view_writes_in_place() {
        let mut image = [0u8; PAYLOAD_OFFSET];
        let header = ImageHeader::read_from_image_mut(&mut image).unwrap();
        header.length.set(0x80);
        header.hash = [0x5A; HASH_SIZE];
        assert_eq!(&image[LENGTH_RANGE], &[0x80, 0, 0, 0]);
        assert!(image[HASH_RANGE].iter().all(|&b| b == 0x5A));
        assert_eq!(image[HASH_OFFSET - 1], 0);
        assert_eq!(image[HASH_OFFSET + HASH_SIZE], 0);
    }
}
