// Licensed under the Apache-2.0 license

//! Drives a release run: every `*.bin` found in the search directories is
//! stamped, padded, converted to Intel HEX, encrypted and published under the
//! current firmware version.

use crate::config::{KeyMaterial, ReleaseConfig};
use crate::encrypt;
use crate::error::{ReleaseError, Result};
use crate::ihex::write_ihex_file;
use crate::pad::pad_to_block;
use crate::publish::ReleasePublisher;
use crate::stamp::{stamp_image, Stamp};
use crate::version::version_string_or_unknown;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};

pub const INPUT_EXTENSION: &str = "bin";
pub const ENCRYPTED_EXTENSION: &str = "gbin";
pub const HEX_EXTENSION: &str = "hex";

/// Outputs of one binary, written next to it until published.
#[derive(Debug)]
pub struct ReleaseArtifacts {
    pub source: PathBuf,
    pub gbin: PathBuf,
    pub hex: PathBuf,
    pub stamp: Stamp,
    pub padding: usize,
    pub image_len: usize,
}

impl ReleaseArtifacts {
    fn remove_intermediates(&self) {
        for path in [&self.gbin, &self.hex] {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Could not remove {}: {e}", path.display());
            }
        }
    }
}

#[derive(Debug)]
pub struct PublishedRelease {
    pub source: PathBuf,
    pub files: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct ReleaseReport {
    pub version: String,
    pub published: Vec<PublishedRelease>,
    pub failed: Vec<(PathBuf, ReleaseError)>,
}

impl ReleaseReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Lists `*.bin` files directly inside each search directory, sorted by
/// name. Missing directories are skipped.
pub fn discover(search_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for dir in search_dirs {
        if !dir.is_dir() {
            warn!("Search directory {} not found; skipping", dir.display());
            continue;
        }
        let mut in_dir: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {e}", dir.display());
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(INPUT_EXTENSION))
            .collect();
        in_dir.sort();
        found.extend(in_dir);
    }
    found
}

/// Stamps and pads a raw image in memory. The order matters: the length
/// field must describe the payload as built, not the fill bytes.
pub fn finalize_image(
    hmac_key: &[u8],
    block_size: usize,
    mut image: Vec<u8>,
) -> Result<(Vec<u8>, Stamp, usize)> {
    let stamp = stamp_image(hmac_key, &mut image)?;
    let padding = pad_to_block(&mut image, block_size)?;
    Ok((image, stamp, padding))
}

/// Produces `X.hex` and `X.gbin` next to `source`.
pub fn build_artifacts(
    config: &ReleaseConfig,
    keys: &KeyMaterial,
    source: &Path,
) -> Result<ReleaseArtifacts> {
    let raw = std::fs::read(source).map_err(ReleaseError::open("binary", source))?;
    let (image, stamp, padding) = finalize_image(&keys.hmac_key, config.block_size, raw)?;
    debug!(
        "{}: payload {:#x} bytes, padded by {padding}",
        source.display(),
        stamp.length
    );

    let encrypted = encrypt::encrypt(&keys.aes_key, &keys.aes_iv, &image)?;

    let hex = source.with_extension(HEX_EXTENSION);
    write_ihex_file(&image, config.flash_start, config.record_len, &hex)?;

    let gbin = source.with_extension(ENCRYPTED_EXTENSION);
    if let Err(e) = std::fs::write(&gbin, &encrypted) {
        if let Err(remove) = std::fs::remove_file(&hex) {
            warn!("Could not remove {}: {remove}", hex.display());
        }
        return Err(ReleaseError::io(&gbin)(e));
    }
    info!("File encrypted: {}", gbin.display());

    Ok(ReleaseArtifacts {
        source: source.to_path_buf(),
        gbin,
        hex,
        stamp,
        padding,
        image_len: image.len(),
    })
}

/// Builds the artifacts for `source`, publishes them and removes the
/// intermediates.
pub fn process_file(
    config: &ReleaseConfig,
    keys: &KeyMaterial,
    publisher: &mut ReleasePublisher,
    source: &Path,
    version: &str,
) -> Result<Vec<PathBuf>> {
    let artifacts = build_artifacts(config, keys, source)?;
    let published = publisher.publish(
        &[artifacts.gbin.as_path(), artifacts.hex.as_path()],
        version,
    );
    artifacts.remove_intermediates();
    published
}

/// Runs the whole release. Only configuration problems fail the run; a
/// failure on one binary is logged, recorded in the report and does not
/// stop the others.
pub fn run(config: &ReleaseConfig) -> Result<ReleaseReport> {
    config.validate()?;
    let keys = config.keys.resolve()?;
    let version = version_string_or_unknown(&config.version_registry);
    info!("Release version: {version}");

    let mut publisher = ReleasePublisher::new(&config.release_dir);
    let mut report = ReleaseReport {
        version,
        published: Vec::new(),
        failed: Vec::new(),
    };

    let sources = discover(&config.search_dirs);
    if sources.is_empty() {
        warn!("No .{INPUT_EXTENSION} files found");
    }
    for source in sources {
        info!("Processing file: {}", source.display());
        match process_file(config, &keys, &mut publisher, &source, &report.version) {
            Ok(files) => report.published.push(PublishedRelease { source, files }),
            Err(e) => {
                error!("{}: {e}", source.display());
                report.failed.push((source, e));
            }
        }
    }
    info!(
        "Released {} of {} binaries to {}",
        report.published.len(),
        report.published.len() + report.failed.len(),
        publisher.dir().display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image_layout::PAYLOAD_OFFSET;

    #[test]
    fn test_finalize_stamps_before_padding() {
        let raw = vec![0x11u8; 0x401];
        let (image, stamp, padding) = finalize_image(b"key", 1024, raw).unwrap();
        assert_eq!(image.len(), 2048);
        assert_eq!(padding, 1023);
        assert_eq!(stamp.length as usize, 0x401 - PAYLOAD_OFFSET);
        assert_eq!(
            stamp.hash,
            crate::stamp::payload_hash(b"key", &[0x11u8; 0x401 - PAYLOAD_OFFSET]).unwrap()
        );
    }

    #[test]
    fn test_finalize_rejects_small_image() {
        assert!(matches!(
            finalize_image(b"key", 1024, vec![0; 16]),
            Err(ReleaseError::ImageTooSmall { .. })
        ));
    }

    #[test]
    fn test_discover() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("a");
        let b = root.path().join("b");
        std::fs::create_dir_all(a.join("nested")).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        for path in [
            a.join("z.bin"),
            a.join("m.bin"),
            a.join("notes.txt"),
            a.join("m.hex"),
            a.join("nested").join("deep.bin"),
            b.join("b.bin"),
        ] {
            std::fs::write(path, b"x").unwrap();
        }
        std::fs::create_dir_all(a.join("dir.bin")).unwrap();

        let found = discover(&[a.clone(), root.path().join("missing"), b.clone()]);
        assert_eq!(found, vec![a.join("m.bin"), a.join("z.bin"), b.join("b.bin")]);
    }
}
