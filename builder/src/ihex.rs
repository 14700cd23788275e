// Licensed under the Apache-2.0 license

//! Address-indexed images and their Intel HEX encoding.

use crate::error::{ReleaseError, Result};
use image_layout::FILL_BYTE;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXTENDED_SEGMENT: u8 = 0x02;
const RECORD_START_SEGMENT: u8 = 0x03;
const RECORD_EXTENDED_LINEAR: u8 = 0x04;
const RECORD_START_LINEAR: u8 = 0x05;

/// Two's complement of the byte sum, so that a whole record sums to zero.
pub fn record_checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &byte| acc.wrapping_add(byte));
    0u8.wrapping_sub(sum)
}

/// Sparse byte image keyed by absolute address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressedImage {
    bytes: BTreeMap<u32, u8>,
}

impl AddressedImage {
    /// Places `data` at `base`, byte `i` at `base + i`.
    pub fn from_bytes(data: &[u8], base: u32) -> Result<Self> {
        let fits = u32::try_from(data.len())
            .ok()
            .and_then(|len| base.checked_add(len.saturating_sub(1)))
            .is_some();
        if !fits {
            return Err(ReleaseError::InvalidRecord {
                line: 0,
                reason: format!(
                    "{} bytes at {base:#010x} run past the 32-bit address space",
                    data.len()
                ),
            });
        }
        let bytes = data
            .iter()
            .enumerate()
            .map(|(i, &b)| (base + i as u32, b))
            .collect();
        Ok(Self { bytes })
    }

    /// Moves the whole image so its lowest address lands on `target_base`,
    /// keeping every byte's distance from that lowest address.
    pub fn relocate(self, target_base: u32) -> Result<Self> {
        let Some(source_base) = self.min_address() else {
            return Ok(self);
        };
        let span = self.max_address().unwrap_or(source_base) - source_base;
        if target_base.checked_add(span).is_none() {
            return Err(ReleaseError::InvalidRecord {
                line: 0,
                reason: format!("image of span {span:#x} does not fit at {target_base:#010x}"),
            });
        }
        let bytes = self
            .bytes
            .into_iter()
            .map(|(addr, b)| (addr - source_base + target_base, b))
            .collect();
        Ok(Self { bytes })
    }

    pub fn get(&self, addr: u32) -> Option<u8> {
        self.bytes.get(&addr).copied()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn min_address(&self) -> Option<u32> {
        self.bytes.keys().next().copied()
    }

    pub fn max_address(&self) -> Option<u32> {
        self.bytes.keys().next_back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u8)> + '_ {
        self.bytes.iter().map(|(&a, &b)| (a, b))
    }

    /// Flattens `min_address..=max_address`, filling holes with erased flash.
    pub fn to_bytes(&self) -> Vec<u8> {
        let (Some(min), Some(max)) = (self.min_address(), self.max_address()) else {
            return Vec::new();
        };
        let mut out = vec![FILL_BYTE; (max - min) as usize + 1];
        for (addr, b) in self.iter() {
            out[(addr - min) as usize] = b;
        }
        out
    }

    /// Writes data records of at most `record_len` bytes. An extended linear
    /// address record precedes the first data record and every change of the
    /// upper 16 address bits; no data record crosses a 64 KiB boundary.
    pub fn write_ihex<W: Write>(&self, out: &mut W, record_len: u8) -> io::Result<()> {
        if record_len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "record length must be non-zero",
            ));
        }
        let mut upper: Option<u16> = None;
        let mut chunk: Vec<u8> = Vec::with_capacity(record_len as usize);
        let mut chunk_start = 0u32;

        for (addr, byte) in self.iter() {
            if !chunk.is_empty() {
                let contiguous = chunk_start.wrapping_add(chunk.len() as u32) == addr
                    && addr & 0xFFFF != 0;
                if !contiguous || chunk.len() == record_len as usize {
                    write_data_record(out, chunk_start, &chunk, &mut upper)?;
                    chunk.clear();
                }
            }
            if chunk.is_empty() {
                chunk_start = addr;
            }
            chunk.push(byte);
        }
        if !chunk.is_empty() {
            write_data_record(out, chunk_start, &chunk, &mut upper)?;
        }
        write_record(out, 0, RECORD_EOF, &[])
    }

    pub fn to_ihex_string(&self, record_len: u8) -> io::Result<String> {
        let mut out = Vec::new();
        self.write_ihex(&mut out, record_len)?;
        String::from_utf8(out).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Decodes Intel HEX text, checking every record checksum. Start address
    /// records are accepted and ignored.
    pub fn parse_ihex(text: &str) -> Result<Self> {
        let mut bytes = BTreeMap::new();
        let mut base = 0u32;
        let mut seen_eof = false;

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let invalid = |reason: String| ReleaseError::InvalidRecord {
                line: line_no,
                reason,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if seen_eof {
                return Err(invalid("data after end-of-file record".into()));
            }
            let hex_digits = line
                .strip_prefix(':')
                .ok_or_else(|| invalid("missing ':' start code".into()))?;
            let record = hex::decode(hex_digits).map_err(|e| invalid(e.to_string()))?;
            if record.len() < 5 || record.len() != record[0] as usize + 5 {
                return Err(invalid(format!("record length {} is inconsistent", record.len())));
            }
            if record_checksum(&record) != 0 {
                return Err(invalid("checksum mismatch".into()));
            }
            let offset = u16::from_be_bytes([record[1], record[2]]) as u32;
            let data = &record[4..record.len() - 1];
            match record[3] {
                RECORD_DATA => {
                    for (i, &b) in data.iter().enumerate() {
                        let addr = base.wrapping_add(offset + i as u32);
                        if bytes.insert(addr, b).is_some() {
                            return Err(invalid(format!("address {addr:#010x} written twice")));
                        }
                    }
                }
                RECORD_EOF => seen_eof = true,
                RECORD_EXTENDED_SEGMENT if data.len() == 2 => {
                    base = (u16::from_be_bytes([data[0], data[1]]) as u32) << 4;
                }
                RECORD_EXTENDED_LINEAR if data.len() == 2 => {
                    base = (u16::from_be_bytes([data[0], data[1]]) as u32) << 16;
                }
                RECORD_START_SEGMENT | RECORD_START_LINEAR => {}
                other => return Err(invalid(format!("unsupported record {other:#04x}"))),
            }
        }
        if !seen_eof {
            return Err(ReleaseError::InvalidRecord {
                line: text.lines().count(),
                reason: "missing end-of-file record".into(),
            });
        }
        Ok(Self { bytes })
    }
}

/// Encodes a flat image placed at `flash_start` and writes it to `output`.
pub fn write_ihex_file(
    image: &[u8],
    flash_start: u32,
    record_len: u8,
    output: &Path,
) -> Result<AddressedImage> {
    let addressed = AddressedImage::from_bytes(image, 0)?.relocate(flash_start)?;
    let mut text = Vec::with_capacity(image.len() * 3);
    addressed
        .write_ihex(&mut text, record_len)
        .map_err(ReleaseError::io(output))?;
    std::fs::write(output, text).map_err(ReleaseError::io(output))?;
    Ok(addressed)
}

/// Converts the flat binary at `input` into an Intel HEX file.
pub fn convert_file(
    input: &Path,
    output: &Path,
    flash_start: u32,
    record_len: u8,
) -> Result<AddressedImage> {
    let image = std::fs::read(input).map_err(ReleaseError::open("binary", input))?;
    write_ihex_file(&image, flash_start, record_len, output)
}

fn write_data_record<W: Write>(
    out: &mut W,
    start: u32,
    data: &[u8],
    upper: &mut Option<u16>,
) -> io::Result<()> {
    let hi = (start >> 16) as u16;
    if *upper != Some(hi) {
        write_record(out, 0, RECORD_EXTENDED_LINEAR, &hi.to_be_bytes())?;
        *upper = Some(hi);
    }
    write_record(out, start as u16, RECORD_DATA, data)
}

fn write_record<W: Write>(out: &mut W, offset: u16, kind: u8, data: &[u8]) -> io::Result<()> {
    let mut record = Vec::with_capacity(data.len() + 5);
    record.push(data.len() as u8);
    record.extend_from_slice(&offset.to_be_bytes());
    record.push(kind);
    record.extend_from_slice(data);
    record.push(record_checksum(&record));
    writeln!(out, ":{}", hex::encode_upper(&record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_checksum() {
        assert_eq!(record_checksum(&[0x02, 0x00, 0x00, 0x04, 0x08, 0x02]), 0xF0);
        assert_eq!(record_checksum(&[0x00, 0x00, 0x00, 0x01]), 0xFF);
        assert_eq!(record_checksum(&[]), 0);
        let record = [0x03, 0x00, 0x30, 0x00, 0x02, 0x33, 0x7A];
        assert_eq!(record_checksum(&record), 0x1E);
    }

    #[test]
    fn test_encode_small_image() {
        let image = AddressedImage::from_bytes(&[0x02, 0x33, 0x7A], 0x0030).unwrap();
        assert_eq!(
            image.to_ihex_string(16).unwrap(),
            ":020000040000FA\n:0300300002337A1E\n:00000001FF\n"
        );
    }

    #[test]
    fn test_relocate_to_flash_start() {
        let data: Vec<u8> = (0..40u8).collect();
        let image = AddressedImage::from_bytes(&data, 0)
            .unwrap()
            .relocate(0x0802_0000)
            .unwrap();
        assert_eq!(image.len(), data.len());
        assert_eq!(image.min_address(), Some(0x0802_0000));
        assert_eq!(image.max_address(), Some(0x0802_0000 + 39));
        for (i, &b) in data.iter().enumerate() {
            assert_eq!(image.get(0x0802_0000 + i as u32), Some(b));
        }
        assert_eq!(image.get(0x0801_FFFF), None);
        assert_eq!(image.get(0x0802_0000 + 40), None);

        let text = image.to_ihex_string(16).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], ":020000040802F0");
        assert!(lines[1].starts_with(":10000000000102"));
        assert!(lines[2].starts_with(":10001000"));
        assert!(lines[3].starts_with(":08002000"));
        assert_eq!(lines[4], ":00000001FF");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_record_width_32() {
        let data = vec![0xA5u8; 100];
        let image = AddressedImage::from_bytes(&data, 0x1000).unwrap();
        let text = image.to_ihex_string(32).unwrap();
        let widths: Vec<&str> = text.lines().skip(1).map(|l| &l[1..3]).collect();
        assert_eq!(widths, ["20", "20", "20", "04", "00"]);
        assert_eq!(AddressedImage::parse_ihex(&text).unwrap(), image);
    }

    #[test]
    fn test_records_split_at_64k_boundary() {
        let data: Vec<u8> = (0..32u8).collect();
        let image = AddressedImage::from_bytes(&data, 0x0001_FFF8).unwrap();
        let text = image.to_ihex_string(16).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], ":020000040001F9");
        assert!(lines[1].starts_with(":08FFF800"));
        assert_eq!(lines[2], ":020000040002F8");
        assert!(lines[3].starts_with(":10000000"));
        assert!(lines[4].starts_with(":08001000"));
        assert_eq!(AddressedImage::parse_ihex(&text).unwrap(), image);
    }

    #[test]
    fn test_gaps_start_new_records() {
        let mut image = AddressedImage::from_bytes(&[1, 2, 3], 0x100).unwrap();
        image.bytes.insert(0x200, 9);
        let text = image.to_ihex_string(16).unwrap();
        assert_eq!(text.lines().count(), 4);
        let parsed = AddressedImage::parse_ihex(&text).unwrap();
        assert_eq!(parsed, image);
        let flat = parsed.to_bytes();
        assert_eq!(flat.len(), 0x101);
        assert_eq!(&flat[..3], &[1, 2, 3]);
        assert_eq!(flat[3], 0xFF);
        assert_eq!(flat[0x100], 9);
    }

    #[test]
    fn test_parse_rejects_corruption() {
        let good = ":020000040802F0\n:0300300002337A1E\n:00000001FF\n";
        assert!(AddressedImage::parse_ihex(good).is_ok());

        for bad in [
            ":020000040802F0\n:0300300002337A1F\n:00000001FF\n",
            ":020000040802F0\n:0300300002337A1E\n",
            "020000040802F0\n:00000001FF\n",
            ":0400300002337A1E\n:00000001FF\n",
            ":0300300002337A1E\n:0300300002337A1E\n:00000001FF\n",
            ":00000001FF\n:0300300002337A1E\n",
            ":0Z\n:00000001FF\n",
        ] {
            assert!(
                matches!(
                    AddressedImage::parse_ihex(bad),
                    Err(ReleaseError::InvalidRecord { .. })
                ),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_empty_image() {
        let image = AddressedImage::from_bytes(&[], 0x0802_0000).unwrap();
        assert!(image.is_empty());
        assert_eq!(image.to_ihex_string(16).unwrap(), ":00000001FF\n");
        assert!(image.to_bytes().is_empty());
    }

    #[test]
    fn test_convert_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("fw.bin");
        let output = dir.path().join("fw.hex");
        std::fs::write(&input, [0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

        let image = convert_file(&input, &output, 0x0802_0000, 16).unwrap();
        assert_eq!(image.get(0x0802_0003), Some(0xEF));
        let text = std::fs::read_to_string(&output).unwrap();
        assert_eq!(AddressedImage::parse_ihex(&text).unwrap(), image);

        let missing = dir.path().join("missing.bin");
        assert!(matches!(
            convert_file(&missing, &output, 0x0802_0000, 16),
            Err(ReleaseError::NotFound { .. })
        ));
    }

    #[test]
    fn test_address_space_overflow() {
        assert!(AddressedImage::from_bytes(&[0; 16], 0xFFFF_FFF8).is_err());
        let image = AddressedImage::from_bytes(&[0; 16], 0).unwrap();
        assert!(image.relocate(0xFFFF_FFF8).is_err());
    }
}
