//! The download engine: chunking planner, per-chunk range worker set,
//! on-disk resumable-state manager, streaming-checksum verifier, and the
//! multi-item queue manager that drives them (spec §1).

mod checksum;
mod downloader;
mod error;
mod planner;
mod probe;
mod progress;
mod queue;
mod worker;

pub use checksum::{hash_file, ChecksumStreamer};
pub use downloader::{DownloadOutcome, DownloadReport, DownloaderConfig, FileDownloader};
pub use error::{EngineError, Result};
pub use planner::plan as plan_chunks;
pub use probe::{probe, ProbeResult};
pub use progress::{ChunkProgress, Event, NullObserver, Observer, Progress, SpeedEstimator};
pub use queue::{ItemStatus, QueueItem, QueueManager, Stats};
pub use worker::{run_chunk, WorkerOutcome, DEFAULT_MAX_RETRIES};

pub use storage::{Checksum, ChecksumAlgorithm, Chunk, ChunkStatus, State};
