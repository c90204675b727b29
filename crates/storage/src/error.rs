//! Errors produced by the State Store.

use std::path::PathBuf;
use thiserror::Error;

/// Failure modes for loading or writing a sidecar.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No sidecar exists at the expected path.
    #[error("no sidecar found at {path}")]
    NotFound {
        /// Path that was probed.
        path: PathBuf,
    },

    /// The sidecar exists but could not be parsed.
    #[error("sidecar at {path} is corrupt: {reason}")]
    Corrupt {
        /// Path of the corrupt sidecar.
        path: PathBuf,
        /// What went wrong while parsing it.
        reason: String,
    },

    /// The sidecar's schema version is newer than this build supports.
    #[error("sidecar at {path} has schema version {found}, this build supports up to {supported}")]
    VersionTooNew {
        /// Path of the sidecar.
        path: PathBuf,
        /// Version recorded in the file.
        found: u32,
        /// Highest version this build understands.
        supported: u32,
    },

    /// Underlying I/O failure (read, write, rename, fsync).
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for State Store operations.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Wrap an I/O error with the path that triggered it.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
