// Licensed under the Apache-2.0 license

//! Release configuration, read from `release.toml`.
//!
//! Key material is never compiled in. It comes from the `[keys]` table of the
//! configuration file or from the caller (the xtask maps environment
//! variables onto [`KeyConfig::apply_overrides`]).

use crate::error::{ReleaseError, Result};
use image_layout::{DEFAULT_BLOCK_SIZE, DEFAULT_FLASH_START};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const DEFAULT_CONFIG_FILE: &str = "release.toml";
pub const DEFAULT_RECORD_LEN: u8 = 16;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReleaseConfig {
    /// Directories searched (non-recursively) for `*.bin` build outputs.
    pub search_dirs: Vec<PathBuf>,
    /// Cleared and repopulated on every run.
    pub release_dir: PathBuf,
    /// Header file holding the firmware version.
    pub version_registry: PathBuf,
    pub flash_start: u32,
    pub block_size: usize,
    /// Data bytes per Intel HEX record.
    pub record_len: u8,
    pub keys: KeyConfig,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        ReleaseConfig {
            search_dirs: vec![PathBuf::from("_Release")],
            release_dir: PathBuf::from("release"),
            version_registry: PathBuf::from("gLib/gCore/gInfo.h"),
            flash_start: DEFAULT_FLASH_START,
            block_size: DEFAULT_BLOCK_SIZE,
            record_len: DEFAULT_RECORD_LEN,
            keys: KeyConfig::default(),
        }
    }
}

impl ReleaseConfig {
    /// Parses a configuration file. Relative paths inside it are taken
    /// relative to the directory holding the file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(ReleaseError::open("configuration", path))?;
        let mut config: ReleaseConfig = toml::from_str(&contents)
            .map_err(|e| ReleaseError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: ReleaseConfig =
            toml::from_str(contents).map_err(|e| ReleaseError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if given, else `release.toml` from the working directory
    /// if it exists, else the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::load(Path::new(DEFAULT_CONFIG_FILE))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(ReleaseError::Config("block_size must be non-zero".into()));
        }
        if self.record_len == 0 {
            return Err(ReleaseError::Config("record_len must be non-zero".into()));
        }
        if self.search_dirs.is_empty() {
            return Err(ReleaseError::Config(
                "at least one search directory is required".into(),
            ));
        }
        // The release directory is emptied on every run.
        for dir in &self.search_dirs {
            let same = *dir == self.release_dir
                || same_file::is_same_file(dir, &self.release_dir).unwrap_or(false);
            if same {
                return Err(ReleaseError::Config(format!(
                    "release_dir {} is also a search directory",
                    self.release_dir.display()
                )));
            }
        }
        Ok(())
    }

    fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.search_dirs.iter_mut().for_each(join);
        join(&mut self.release_dir);
        join(&mut self.version_registry);
    }
}

/// Hex-encoded key material as it appears in the configuration.
#[derive(Clone, Default, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(deny_unknown_fields)]
pub struct KeyConfig {
    pub aes_key: Option<String>,
    pub aes_iv: Option<String>,
    pub hmac_key: Option<String>,
}

impl fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("KeyConfig")
            .field("aes_key", &redact(&self.aes_key))
            .field("aes_iv", &redact(&self.aes_iv))
            .field("hmac_key", &redact(&self.hmac_key))
            .finish()
    }
}

impl KeyConfig {
    pub fn apply_overrides(
        &mut self,
        aes_key: Option<String>,
        aes_iv: Option<String>,
        hmac_key: Option<String>,
    ) {
        if aes_key.is_some() {
            self.aes_key = aes_key;
        }
        if aes_iv.is_some() {
            self.aes_iv = aes_iv;
        }
        if hmac_key.is_some() {
            self.hmac_key = hmac_key;
        }
    }

    /// Decodes the hex strings. Lengths are checked by the primitives that
    /// consume them, so a wrong-length key fails each file it touches.
    pub fn resolve(&self) -> Result<KeyMaterial> {
        Ok(KeyMaterial {
            aes_key: decode_key("aes_key", &self.aes_key)?,
            aes_iv: decode_key("aes_iv", &self.aes_iv)?,
            hmac_key: decode_key("hmac_key", &self.hmac_key)?,
        })
    }
}

fn decode_key(name: &str, value: &Option<String>) -> Result<Vec<u8>> {
    let value = value
        .as_deref()
        .ok_or_else(|| ReleaseError::Config(format!("missing key material: {name}")))?;
    hex::decode(value.trim())
        .map_err(|e| ReleaseError::Config(format!("{name} is not valid hex: {e}")))
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    pub aes_key: Vec<u8>,
    pub aes_iv: Vec<u8>,
    pub hmac_key: Vec<u8>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("aes_key_len", &self.aes_key.len())
            .field("aes_iv_len", &self.aes_iv.len())
            .field("hmac_key_len", &self.hmac_key.len())
            .finish()
    }
}
