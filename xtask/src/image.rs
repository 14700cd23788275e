// Licensed under the Apache-2.0 license

use crate::GlobalArgs;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

pub(crate) fn verify(args: &GlobalArgs, file: &Path, encrypted: bool) -> Result<()> {
    let config = crate::config::load(args)?;
    let keys = config.keys.resolve()?;
    let report = release_builder::verify::verify_file(&keys, file, config.block_size, encrypted)?;
    println!("{report}");
    if !report.is_valid() {
        bail!("{} failed verification", file.display());
    }
    println!("Image is valid!");
    Ok(())
}

pub(crate) fn decrypt(args: &GlobalArgs, file: &Path, output: &Path) -> Result<()> {
    let config = crate::config::load(args)?;
    let keys = config.keys.resolve()?;
    let data = std::fs::read(file).with_context(|| format!("Cannot read {}", file.display()))?;
    let plain = release_builder::encrypt::decrypt(&keys.aes_key, &keys.aes_iv, &data)?;
    std::fs::write(output, plain)
        .with_context(|| format!("Cannot write {}", output.display()))?;
    println!("Decrypted {} to {}", file.display(), output.display());
    Ok(())
}

pub(crate) fn ihex(
    args: &GlobalArgs,
    file: &Path,
    output: Option<PathBuf>,
    flash_start: Option<u32>,
) -> Result<()> {
    let config = crate::config::load(args)?;
    let output = output.unwrap_or_else(|| file.with_extension("hex"));
    let flash_start = flash_start.unwrap_or(config.flash_start);
    let image = release_builder::ihex::convert_file(file, &output, flash_start, config.record_len)?;
    println!(
        "Wrote {} bytes at {:#010x} to {}",
        image.len(),
        flash_start,
        output.display()
    );
    Ok(())
}
