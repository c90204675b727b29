//! The persisted per-file resume record (spec §3 "State").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version this build writes and the newest it will load.
pub const SCHEMA_VERSION: u32 = 1;

/// Lifecycle of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStatus {
    /// Not yet requested.
    Pending,
    /// A range request is in flight.
    InProgress,
    /// All bytes for this chunk have been written and verified complete.
    Completed,
    /// The chunk exhausted its retry budget.
    Failed,
}

impl ChunkStatus {
    /// Render as the literal string used in the sidecar format.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the sidecar's literal status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A contiguous byte range of one file, handled by one worker.
///
/// `end == -1` means the end is unknown because the server did not
/// advertise a size; the worker reads until EOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-based, dense; matches this chunk's position in the owning State's list.
    pub id: u32,
    /// Starting byte offset, inclusive.
    pub start: u64,
    /// Ending byte offset, inclusive, or -1 if unknown.
    pub end: i64,
    /// Bytes of this chunk already persisted.
    pub downloaded: u64,
    /// Current lifecycle status.
    pub status: ChunkStatus,
}

impl Chunk {
    /// Size in bytes, or `None` when the end is unknown.
    pub fn size(&self) -> Option<u64> {
        if self.end < 0 {
            None
        } else {
            Some((self.end as u64) - self.start + 1)
        }
    }

    /// Next byte to request on resume.
    pub fn resume_from(&self) -> u64 {
        self.start + self.downloaded
    }

    /// Whether every known byte of this chunk has been persisted.
    pub fn is_complete(&self) -> bool {
        match self.size() {
            Some(size) => self.downloaded >= size,
            None => self.status == ChunkStatus::Completed,
        }
    }
}

/// Checksum algorithm tag (spec §3/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Blake3,
}

impl ChecksumAlgorithm {
    /// Expected lowercase-hex digest length for this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha256 => 64,
            Self::Sha512 => 128,
            Self::Blake3 => 64,
        }
    }

    /// Render as the literal tag used in checksum strings and the sidecar.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Blake3 => "blake3",
        }
    }

    /// Parse an algorithm tag (case-sensitive, lowercase).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "md5" => Some(Self::Md5),
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            "blake3" => Some(Self::Blake3),
            _ => None,
        }
    }
}

/// Checksum descriptor: algorithm plus expected and (once known) actual hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub expected: String,
    pub actual: Option<String>,
}

/// The persisted per-file record (spec §3 "State", §6 sidecar format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub version: u32,
    pub url: String,
    pub filename: String,
    pub total_size: Option<u64>,
    pub accept_range: bool,
    pub chunks: Vec<Chunk>,
    pub checksum: Option<Checksum>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl State {
    /// Aggregate bytes downloaded across every chunk.
    ///
    /// This is *derived*, not stored separately, so the invariant
    /// `downloaded = Σ chunk.downloaded` (spec §3, §8) cannot drift.
    pub fn downloaded(&self) -> u64 {
        self.chunks.iter().map(|c| c.downloaded).sum()
    }

    /// Whether every chunk has reached `Completed`.
    pub fn is_complete(&self) -> bool {
        !self.chunks.is_empty() && self.chunks.iter().all(|c| c.status == ChunkStatus::Completed)
    }

    /// Create a fresh record for a newly-planned download.
    pub fn new(
        url: String,
        filename: String,
        total_size: Option<u64>,
        accept_range: bool,
        chunks: Vec<Chunk>,
        checksum: Option<Checksum>,
    ) -> Self {
        let now = Utc::now();
        Self {
            version: SCHEMA_VERSION,
            url,
            filename,
            total_size,
            accept_range,
            chunks,
            checksum,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this state can be reused for a resumed transfer of `url`
    /// writing to `filename`, per the File Downloader's resume decision
    /// (spec §4.F.1): URL, filename, and (when known) total size must match.
    pub fn matches(&self, url: &str, filename: &str, total_size: Option<u64>) -> bool {
        if self.url != url || self.filename != filename {
            return false;
        }
        match (self.total_size, total_size) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk(id: u32, start: u64, end: i64, downloaded: u64) -> Chunk {
        Chunk {
            id,
            start,
            end,
            downloaded,
            status: ChunkStatus::Pending,
        }
    }

    #[test]
    fn chunk_size_known() {
        let c = sample_chunk(0, 0, 99, 0);
        assert_eq!(c.size(), Some(100));
    }

    #[test]
    fn chunk_size_unknown_end() {
        let c = sample_chunk(0, 0, -1, 0);
        assert_eq!(c.size(), None);
    }

    #[test]
    fn chunk_resume_from() {
        let c = sample_chunk(0, 100, 199, 40);
        assert_eq!(c.resume_from(), 140);
    }

    #[test]
    fn state_downloaded_is_sum_of_chunks() {
        let chunks = vec![
            sample_chunk(0, 0, 99, 100),
            sample_chunk(1, 100, 199, 50),
        ];
        let state = State::new("u".into(), "f".into(), Some(200), true, chunks, None);
        assert_eq!(state.downloaded(), 150);
    }

    #[test]
    fn state_is_complete_requires_all_chunks_completed() {
        let mut chunks = vec![sample_chunk(0, 0, 99, 100)];
        chunks[0].status = ChunkStatus::Completed;
        let state = State::new("u".into(), "f".into(), Some(100), true, chunks, None);
        assert!(state.is_complete());
    }

    #[test]
    fn state_matches_checks_url_filename_and_size() {
        let state = State::new("u".into(), "f".into(), Some(100), true, vec![], None);
        assert!(state.matches("u", "f", Some(100)));
        assert!(!state.matches("other", "f", Some(100)));
        assert!(!state.matches("u", "f", Some(200)));
        assert!(state.matches("u", "f", None));
    }

    #[test]
    fn checksum_algorithm_hex_lengths() {
        assert_eq!(ChecksumAlgorithm::Md5.hex_len(), 32);
        assert_eq!(ChecksumAlgorithm::Sha1.hex_len(), 40);
        assert_eq!(ChecksumAlgorithm::Sha256.hex_len(), 64);
        assert_eq!(ChecksumAlgorithm::Sha512.hex_len(), 128);
        assert_eq!(ChecksumAlgorithm::Blake3.hex_len(), 64);
    }
}
