// Licensed under the Apache-2.0 license

use crate::error::{ReleaseError, Result};
use image_layout::FILL_BYTE;

/// Appends fill bytes until the image ends on a flash block boundary and
/// returns how many were added.
pub fn pad_to_block(image: &mut Vec<u8>, block_size: usize) -> Result<usize> {
    if block_size == 0 {
        return Err(ReleaseError::Config("block size must be non-zero".into()));
    }
    let padding = image.len().next_multiple_of(block_size) - image.len();
    image.resize(image.len() + padding, FILL_BYTE);
    Ok(padding)
}
