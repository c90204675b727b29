//! Engine error taxonomy (spec §7).

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors the download engine can produce, one variant per spec §7 kind.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Missing scheme/host or unparsable. Fatal per item.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Transient transport failure. Retried with bounded jittered backoff.
    #[error("network error: {0}")]
    NetworkError(String),

    /// 4xx is fatal per item; 5xx is retried.
    #[error("unexpected HTTP status {status} from {url}")]
    HttpStatus {
        /// The offending status code.
        status: u16,
        /// The request URL.
        url: String,
    },

    /// Protocol-level violation, e.g. 200 for a ranged request with
    /// partial work already in progress.
    #[error("invalid response from server: {0}")]
    InvalidResponse(String),

    /// Disk write, create, rename, or fsync failure.
    #[error("I/O error at {path}: {source}")]
    IOError {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Final hash did not match the expected checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Algorithm tag used for verification.
        algorithm: String,
        /// Expected hex digest.
        expected: String,
        /// Actual hex digest.
        actual: String,
    },

    /// Requested algorithm tag is not one of md5/sha1/sha256/sha512/blake3.
    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// `"alg:hex"` string is not well-formed for its algorithm.
    #[error("malformed checksum string: {0}")]
    MalformedChecksum(String),

    /// Cooperative termination; not an error in aggregate exit-code
    /// semantics, but surfaced as a terminal status.
    #[error("canceled")]
    Canceled,

    /// Sidecar could not be parsed; transfer restarts from zero.
    #[error("resume state is corrupt: {0}")]
    StateCorrupt(String),

    /// Sidecar's schema version is newer than this build supports.
    #[error("resume state schema version is too new: {0}")]
    VersionTooNew(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Wrap an I/O error with the path that triggered it.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::IOError {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether this error's kind is retryable per spec §7.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError(_) => true,
            Self::HttpStatus { status, .. } => (500..600).contains(status),
            Self::IOError { .. } => true,
            _ => false,
        }
    }
}

impl From<storage::StorageError> for EngineError {
    fn from(err: storage::StorageError) -> Self {
        match err {
            storage::StorageError::NotFound { .. } => {
                Self::StateCorrupt("sidecar not found".to_string())
            }
            storage::StorageError::Corrupt { reason, .. } => Self::StateCorrupt(reason),
            storage::StorageError::VersionTooNew { found, supported, .. } => {
                Self::VersionTooNew(format!("found {found}, supported up to {supported}"))
            }
            storage::StorageError::Io { path, source } => Self::io(path, source),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::HttpStatus {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        Self::NetworkError(err.to_string())
    }
}

impl From<url::ParseError> for EngineError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}
