// Licensed under the Apache-2.0 license

use crate::GlobalArgs;
use anyhow::{bail, Result};
use std::path::PathBuf;

pub(crate) struct ReleaseOverrides {
    pub search_dirs: Vec<PathBuf>,
    pub release_dir: Option<PathBuf>,
    pub registry: Option<PathBuf>,
    pub flash_start: Option<u32>,
    pub block_size: Option<usize>,
    pub record_len: Option<u8>,
}

pub(crate) fn release(args: &GlobalArgs, overrides: ReleaseOverrides) -> Result<()> {
    let mut config = crate::config::load(args)?;
    if !overrides.search_dirs.is_empty() {
        config.search_dirs = overrides.search_dirs;
    }
    if let Some(dir) = overrides.release_dir {
        config.release_dir = dir;
    }
    if let Some(registry) = overrides.registry {
        config.version_registry = registry;
    }
    if let Some(flash_start) = overrides.flash_start {
        config.flash_start = flash_start;
    }
    if let Some(block_size) = overrides.block_size {
        config.block_size = block_size;
    }
    if let Some(record_len) = overrides.record_len {
        config.record_len = record_len;
    }

    let report = release_builder::run(&config)?;
    for published in &report.published {
        for file in &published.files {
            println!("{}", file.display());
        }
    }
    if !report.is_success() {
        bail!(
            "{} of {} binaries failed to release",
            report.failed.len(),
            report.failed.len() + report.published.len()
        );
    }
    Ok(())
}
