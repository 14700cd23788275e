// Licensed under the Apache-2.0 license

use crate::error::{ReleaseError, Result};
use log::{error, info};
use std::path::{Path, PathBuf};

/// Owns the release directory for one run.
///
/// The directory is emptied once, right before the first artifact lands in
/// it. Publishing takes `&mut self`, so a clear can never interleave with
/// another publish.
pub struct ReleasePublisher {
    dir: PathBuf,
    prepared: bool,
}

impl ReleasePublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prepared: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the directory, or removes every regular file already in it.
    /// Only the first call per publisher does anything. Returns the number of
    /// files removed.
    pub fn prepare(&mut self) -> Result<usize> {
        if self.prepared {
            return Ok(0);
        }
        let publish_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| ReleaseError::PublishError { path, source }
        };
        std::fs::create_dir_all(&self.dir).map_err(publish_err(&self.dir))?;

        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir).map_err(publish_err(&self.dir))? {
            let path = entry.map_err(publish_err(&self.dir))?.path();
            if !path.is_file() {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => error!("Error deleting {}: {e}", path.display()),
            }
        }
        self.prepared = true;
        info!(
            "Cleared {removed} previous artifacts from {}",
            self.dir.display()
        );
        Ok(removed)
    }

    /// Copies each artifact into the release directory as
    /// `{stem}_{version}.{ext}` and returns the destination paths.
    ///
    /// Artifacts already copied stay in place if a later one fails. A
    /// destination that already exists is never overwritten.
    pub fn publish(&mut self, artifacts: &[&Path], version: &str) -> Result<Vec<PathBuf>> {
        self.prepare()?;
        let mut published = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let destination = self.dir.join(versioned_name(artifact, version)?);
            if destination.exists() {
                return Err(ReleaseError::PublishError {
                    path: destination,
                    source: std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "already published in this run",
                    ),
                });
            }
            std::fs::copy(artifact, &destination).map_err(|source| {
                ReleaseError::PublishError {
                    path: destination.clone(),
                    source,
                }
            })?;
            info!("Published {}", destination.display());
            published.push(destination);
        }
        Ok(published)
    }
}

/// `{stem}_{version}.{ext}` for the file at `path`.
pub fn versioned_name(path: &Path, version: &str) -> Result<String> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ReleaseError::PublishError {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"),
        })?;
    Ok(match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}_{version}.{ext}"),
        None => format!("{stem}_{version}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_versioned_name() {
        assert_eq!(
            versioned_name(Path::new("out/SWC1.gbin"), "1.0.0-038").unwrap(),
            "SWC1_1.0.0-038.gbin"
        );
        assert_eq!(
            versioned_name(Path::new("SWC1.hex"), "unknown").unwrap(),
            "SWC1_unknown.hex"
        );
        assert_eq!(
            versioned_name(Path::new("noext"), "1.0.0-000").unwrap(),
            "noext_1.0.0-000"
        );
    }

    #[test]
    fn test_prepare_creates_missing_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("release").join("nested");
        let mut publisher = ReleasePublisher::new(&dir);
        assert_eq!(publisher.prepare().unwrap(), 0);
        assert!(dir.is_dir());
    }

    #[test]
    fn test_prepare_clears_once() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("release");
        fs::create_dir_all(dir.join("keep")).unwrap();
        fs::write(dir.join("old_1.0.0-001.gbin"), b"old").unwrap();
        fs::write(dir.join("old_1.0.0-001.hex"), b"old").unwrap();

        let src = root.path().join("fw.gbin");
        fs::write(&src, b"new").unwrap();

        let mut publisher = ReleasePublisher::new(&dir);
        assert_eq!(publisher.prepare().unwrap(), 2);
        publisher.publish(&[src.as_path()], "1.0.0-002").unwrap();
        // a second prepare must not remove what was just published
        assert_eq!(publisher.prepare().unwrap(), 0);

        let mut names: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, ["fw_1.0.0-002.gbin", "keep"]);
        assert_eq!(fs::read(dir.join("fw_1.0.0-002.gbin")).unwrap(), b"new");
    }

    #[test]
    fn test_publish_refuses_to_overwrite() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("release");
        fs::create_dir_all(root.path().join("a")).unwrap();
        fs::create_dir_all(root.path().join("b")).unwrap();
        let first = root.path().join("a").join("fw.gbin");
        let second = root.path().join("b").join("fw.gbin");
        fs::write(&first, b"first").unwrap();
        fs::write(&second, b"second").unwrap();

        let mut publisher = ReleasePublisher::new(&dir);
        publisher.publish(&[first.as_path()], "v").unwrap();
        let err = publisher.publish(&[second.as_path()], "v").unwrap_err();
        assert!(matches!(
            err,
            ReleaseError::PublishError { ref source, .. }
                if source.kind() == std::io::ErrorKind::AlreadyExists
        ));
        assert_eq!(fs::read(dir.join("fw_v.gbin")).unwrap(), b"first");
    }

    #[test]
    fn test_publish_keeps_earlier_files() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("release");
        let a = root.path().join("a.gbin");
        let b = root.path().join("b.gbin");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let mut publisher = ReleasePublisher::new(&dir);
        publisher.publish(&[a.as_path()], "v").unwrap();
        publisher.publish(&[b.as_path()], "v").unwrap();

        let missing = root.path().join("missing.hex");
        let err = publisher
            .publish(&[missing.as_path()], "v")
            .unwrap_err();
        assert!(matches!(err, ReleaseError::PublishError { .. }));
        assert!(dir.join("a_v.gbin").is_file());
        assert!(dir.join("b_v.gbin").is_file());
    }
}
