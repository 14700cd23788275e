// Licensed under the Apache-2.0 license

//! Firmware version registry.
//!
//! The registry is a C header carrying the version twice: as four
//! `#define GINFO_FW_*` lines edited by developers, and as an `@fw_version:`
//! banner recording the version of the last build.

use crate::error::{ReleaseError, Result};
use chrono::NaiveDate;
use log::{debug, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const UNKNOWN_VERSION: &str = "unknown";

const BANNER_TAG: &str = "@fw_version:";
const BLOCK_BEGIN: &str = "/* USER CODE BEGIN fw_version */";
const BLOCK_END: &str = "/* USER CODE END fw_version */";

const DEFINE_MAJOR: &str = "GINFO_FW_MAJOR";
const DEFINE_MINOR: &str = "GINFO_FW_MINOR";
const DEFINE_PATCH: &str = "GINFO_FW_PATCH";
const DEFINE_DEV_BUILD: &str = "GINFO_FW_DEV_BUILD";
const DEFINES: [&str; 4] = [DEFINE_MAJOR, DEFINE_MINOR, DEFINE_PATCH, DEFINE_DEV_BUILD];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub dev_build: u32,
}

impl FirmwareVersion {
    pub fn new(major: u32, minor: u32, patch: u32, dev_build: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            dev_build,
        }
    }

    pub fn triple(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch)
    }

    /// The version recorded after `previous` once the developer-facing
    /// defines carry `triple`: the dev build counts up while the triple is
    /// unchanged and restarts at zero when it moves.
    pub fn next(previous: &FirmwareVersion, triple: (u32, u32, u32)) -> Result<FirmwareVersion> {
        let (major, minor, patch) = triple;
        let dev_build = if previous.triple() == triple {
            previous.dev_build.checked_add(1).ok_or_else(|| {
                ReleaseError::Config(format!("dev build counter exhausted at {previous}"))
            })?
        } else {
            0
        };
        Ok(FirmwareVersion::new(major, minor, patch, dev_build))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}-{:03}",
            self.major, self.minor, self.patch, self.dev_build
        )
    }
}

impl FromStr for FirmwareVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (triple, dev_build) = s
            .split_once('-')
            .ok_or_else(|| format!("missing dev build in version {s:?}"))?;
        let parts: Vec<&str> = triple.split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(format!("expected major.minor.patch in version {s:?}"));
        };
        let num = |v: &str| {
            v.parse::<u32>()
                .map_err(|e| format!("bad number {v:?} in version {s:?}: {e}"))
        };
        Ok(FirmwareVersion::new(
            num(*major)?,
            num(*minor)?,
            num(*patch)?,
            num(dev_build)?,
        ))
    }
}

pub struct VersionRegistry {
    path: PathBuf,
    contents: String,
}

impl VersionRegistry {
    pub fn open(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(ReleaseError::open("version registry", path))?;
        Ok(Self::from_contents(path, contents))
    }

    pub fn from_contents(path: &Path, contents: String) -> Self {
        Self {
            path: path.to_path_buf(),
            contents,
        }
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    /// Version stamped into the banner by the previous registry update.
    pub fn recorded(&self) -> Option<FirmwareVersion> {
        self.contents
            .lines()
            .find_map(|line| line.split_once(BANNER_TAG))
            .and_then(|(_, version)| version.parse().ok())
    }

    /// Version carried by the four defines; `None` unless all are present.
    pub fn defines(&self) -> Option<FirmwareVersion> {
        let mut values = [None; 4];
        for line in self.contents.lines() {
            if let Some((key, value)) = parse_define(line) {
                if let Some(i) = DEFINES.iter().position(|d| *d == key) {
                    values[i] = value.parse::<u32>().ok();
                }
            }
        }
        match values {
            [Some(major), Some(minor), Some(patch), Some(dev_build)] => {
                Some(FirmwareVersion::new(major, minor, patch, dev_build))
            }
            _ => None,
        }
    }

    pub fn current(&self) -> Result<FirmwareVersion> {
        self.recorded()
            .or_else(|| self.defines())
            .ok_or_else(|| ReleaseError::NotFound {
                what: "firmware version",
                path: self.path.clone(),
            })
    }

    /// Rewrites the four defines to `version`, keeping every other line.
    fn with_defines(&self, version: &FirmwareVersion) -> String {
        let values = [
            version.major,
            version.minor,
            version.patch,
            version.dev_build,
        ];
        self.contents
            .split_inclusive('\n')
            .map(|line| {
                let Some((key, _)) = parse_define(line) else {
                    return line.to_string();
                };
                match DEFINES.iter().position(|d| *d == key) {
                    Some(i) => format!("{}{}", format_define(key, values[i]), line_ending(line)),
                    None => line.to_string(),
                }
            })
            .collect()
    }
}

fn parse_define(line: &str) -> Option<(&str, &str)> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "#define" {
        return None;
    }
    Some((tokens.next()?, tokens.next()?))
}

/// Value lands in column 39, matching the hand-aligned defines.
fn format_define(key: &str, value: u32) -> String {
    format!("#define {key:<29} {value}")
}

fn line_ending(line: &str) -> &str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}

/// Reads the current version. The release pipeline labels artifacts with it.
pub fn read_version(path: &Path) -> Result<FirmwareVersion> {
    VersionRegistry::open(path)?.current()
}

/// Like [`read_version`], but falls back to [`UNKNOWN_VERSION`]; artifact
/// naming must not stop a release.
pub fn version_string_or_unknown(path: &Path) -> String {
    match read_version(path) {
        Ok(version) => version.to_string(),
        Err(e) => {
            warn!("{e}; labelling artifacts as {UNKNOWN_VERSION:?}");
            UNKNOWN_VERSION.to_string()
        }
    }
}

fn banner(version: &FirmwareVersion, date: NaiveDate) -> String {
    format!(
        "/**\n * {BANNER_TAG}  {version}\n * @fw_date:     {}\n */\n",
        date.format("%d-%m-%Y")
    )
}

/// Replaces whatever sits between the fw_version markers with `block`.
/// Returns `None` when the markers are absent.
fn replace_version_block(contents: &str, block: &str) -> Option<String> {
    if !contents.contains(BLOCK_BEGIN) || !contents.contains(BLOCK_END) {
        return None;
    }
    let mut out = String::with_capacity(contents.len() + block.len());
    let mut in_block = false;
    for line in contents.split_inclusive('\n') {
        if line.contains(BLOCK_BEGIN) {
            out.push_str(line);
            out.push_str(block);
            in_block = true;
        } else if line.contains(BLOCK_END) {
            out.push_str(line);
            in_block = false;
        } else if !in_block {
            out.push_str(line);
        }
    }
    Some(out)
}

/// Advances the registry to the next build and returns the new version.
///
/// The previous version is the banner; a registry without one counts as
/// having recorded its own defines. When `source_root` is given, every `.c`
/// and `.h` file beneath it with fw_version markers gets the new banner.
pub fn bump_registry(
    registry_path: &Path,
    source_root: Option<&Path>,
    date: NaiveDate,
) -> Result<FirmwareVersion> {
    let registry = VersionRegistry::open(registry_path)?;
    let defines = registry.defines().ok_or_else(|| ReleaseError::NotFound {
        what: "GINFO_FW_* defines",
        path: registry_path.to_path_buf(),
    })?;
    let previous = registry.recorded().unwrap_or(defines);
    let next = FirmwareVersion::next(&previous, defines.triple())?;
    debug!("previous version {previous}, defines {defines}, next {next}");

    let block = banner(&next, date);
    let updated = registry.with_defines(&next);
    let updated = replace_version_block(&updated, &block).unwrap_or(updated);
    std::fs::write(registry_path, updated).map_err(ReleaseError::io(registry_path))?;

    if let Some(root) = source_root {
        let stamped = stamp_sources(root, registry_path, &block)?;
        info!("Updated version banner in {stamped} source files");
    }
    info!("Firmware version is now {next}");
    Ok(next)
}

fn stamp_sources(root: &Path, registry_path: &Path, block: &str) -> Result<usize> {
    let mut stamped = 0;
    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| ReleaseError::Io {
            path: e.path().unwrap_or(root).to_path_buf(),
            source: e.into(),
        })?;
        let path = entry.path();
        let is_source = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("c" | "h")
        );
        if !entry.file_type().is_file() || !is_source {
            continue;
        }
        if same_file::is_same_file(path, registry_path).unwrap_or(false) {
            continue;
        }
        let contents = std::fs::read_to_string(path).map_err(ReleaseError::io(path))?;
        if let Some(updated) = replace_version_block(&contents, block) {
            std::fs::write(path, updated).map_err(ReleaseError::io(path))?;
            stamped += 1;
        }
    }
    Ok(stamped)
}
