// Licensed under the Apache-2.0 license

use std::path::PathBuf;
use thiserror::Error;

/// Failures of a release run. Everything except `Config` is scoped to a
/// single input binary; the pipeline logs it and moves on to the next file.
#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("{what} not found: {}", path.display())]
    NotFound { what: &'static str, path: PathBuf },
    #[error("image is {len} bytes; at least {min} are needed to hold the header")]
    ImageTooSmall { len: usize, min: usize },
    #[error("crypto failure: {0}")]
    CryptoFailure(String),
    #[error("failed to publish {}: {source}", path.display())]
    PublishError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image is {len} bytes; the length field only holds 32 bits")]
    ImageTooLarge { len: usize },
    #[error("invalid record data on line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ReleaseError>;

impl ReleaseError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> ReleaseError {
        let path = path.into();
        move |source| ReleaseError::Io { path, source }
    }

    /// Maps a missing file to `NotFound` and any other I/O error to `Io`.
    pub(crate) fn open(
        what: &'static str,
        path: impl Into<PathBuf>,
    ) -> impl FnOnce(std::io::Error) -> ReleaseError {
        let path = path.into();
        move |source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ReleaseError::NotFound { what, path }
            } else {
                ReleaseError::Io { path, source }
            }
        }
    }
}
