//! Orchestrates one URL end-to-end: probe -> plan -> workers -> verify ->
//! finalize (spec §4.F).

use futures_util::stream::{self, StreamExt};
use reqwest::Client;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use storage::{Checksum, ChecksumAlgorithm, State};

use crate::checksum::{hash_file, ChecksumStreamer};
use crate::error::{EngineError, Result};
use crate::planner;
use crate::probe;
use crate::progress::{Event, Observer, SpeedEstimator};
use crate::worker::{self, SharedState, WorkerOutcome};

/// Tunables for one File Downloader run (spec §4.F, §5 timeouts).
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub max_concurrency_per_file: u32,
    pub max_retries_per_chunk: u32,
    pub progress_tick: Duration,
    pub connect_timeout: Duration,
    pub read_idle_timeout: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            max_concurrency_per_file: 4,
            max_retries_per_chunk: worker::DEFAULT_MAX_RETRIES,
            progress_tick: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(30),
            read_idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Terminal outcome of one File Downloader run.
#[derive(Debug)]
pub enum DownloadOutcome {
    Completed,
    Skipped,
    Canceled,
}

/// A completed run's outcome plus the retry count the caller surfaces on
/// the owning `QueueItem` (spec §3 "retry counter").
#[derive(Debug)]
pub struct DownloadReport {
    pub outcome: DownloadOutcome,
    pub retries: u32,
}

/// Runs one URL to a destination path end-to-end, reporting lifecycle
/// events through `observer` tagged with `item_id`.
pub struct FileDownloader {
    config: DownloaderConfig,
    client: Client,
}

impl FileDownloader {
    pub fn new(config: DownloaderConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_idle_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(EngineError::from)?;
        Ok(Self { config, client })
    }

    pub async fn run(
        &self,
        item_id: u64,
        url: &str,
        dest_path: &Path,
        expected_checksum: Option<(ChecksumAlgorithm, String)>,
        cancel: CancellationToken,
        observer: Arc<dyn Observer>,
    ) -> Result<DownloadReport> {
        observer.on_event(Event::Started { item_id });

        // Step 7, skip rule: a checksum match against the existing file
        // requires no network I/O at all.
        if let Some((algorithm, expected_hex)) = &expected_checksum {
            if tokio::fs::metadata(dest_path).await.is_ok() && !sidecar_exists(dest_path) {
                let actual = hash_file(dest_path, *algorithm).await?;
                if constant_time_matches(&actual, expected_hex) {
                    observer.on_event(Event::Skipped { item_id });
                    return Ok(DownloadReport {
                        outcome: DownloadOutcome::Skipped,
                        retries: 0,
                    });
                }
            }
        } else if let Some(report) = skip_via_existing_sidecar(dest_path, url, item_id, &observer).await? {
            return Ok(report);
        }

        if cancel.is_cancelled() {
            return Ok(DownloadReport {
                outcome: DownloadOutcome::Canceled,
                retries: 0,
            });
        }

        let filename = dest_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "download".to_string());

        let probe_result = probe::probe(&self.client, url).await?;
        let sidecar_path = storage::sidecar_path(dest_path);

        let state = resume_or_plan(
            &sidecar_path,
            url,
            &filename,
            &probe_result,
            expected_checksum,
            self.config.max_concurrency_per_file,
        )?;

        if state.is_complete() {
            finalize(&state, &sidecar_path, dest_path, observer.clone(), item_id).await?;
            return Ok(DownloadReport {
                outcome: DownloadOutcome::Completed,
                retries: 0,
            });
        }

        preallocate(dest_path, state.total_size).await?;

        let shared = Arc::new(SharedState {
            state: Mutex::new(state),
            sidecar_path: sidecar_path.clone(),
            retry_count: AtomicU32::new(0),
        });

        let pending_chunk_ids: Vec<u32> = {
            let guard = shared.state.lock().await;
            guard
                .chunks
                .iter()
                .filter(|c| !c.is_complete())
                .map(|c| c.id)
                .collect()
        };

        let dest_path_arc = Arc::new(dest_path.to_path_buf());
        let worker_cancel = cancel.child_token();
        let progress_handle = spawn_progress_ticker(
            shared.clone(),
            observer.clone(),
            item_id,
            self.config.progress_tick,
            worker_cancel.clone(),
        );

        let max_concurrency = self.config.max_concurrency_per_file.max(1) as usize;
        let client = self.client.clone();
        let max_retries = self.config.max_retries_per_chunk;

        let results: Vec<Result<WorkerOutcome>> = stream::iter(pending_chunk_ids)
            .map(|chunk_id| {
                let client = client.clone();
                let url = url.to_string();
                let dest_path_arc = dest_path_arc.clone();
                let shared = shared.clone();
                let cancel = worker_cancel.clone();
                async move {
                    worker::run_chunk(chunk_id, client, url, dest_path_arc, shared, cancel, max_retries)
                        .await
                }
            })
            .buffer_unordered(max_concurrency)
            .collect()
            .await;

        progress_handle.abort();

        let mut first_error = None;
        let mut any_canceled = false;
        for result in results {
            match result {
                Ok(WorkerOutcome::Canceled) => any_canceled = true,
                Ok(WorkerOutcome::Completed) => {}
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(_) => {}
            }
        }

        let retries = shared.retry_count.load(Ordering::Relaxed);

        if let Some(err) = first_error {
            let reason = err.to_string();
            observer.on_event(Event::Failed { item_id, reason });
            return Err(err);
        }

        if any_canceled || cancel.is_cancelled() {
            return Ok(DownloadReport {
                outcome: DownloadOutcome::Canceled,
                retries,
            });
        }

        let final_state = { shared.state.lock().await.clone() };
        match finalize(&final_state, &sidecar_path, dest_path, observer.clone(), item_id).await {
            Ok(()) => Ok(DownloadReport {
                outcome: DownloadOutcome::Completed,
                retries,
            }),
            Err(err) => {
                observer.on_event(Event::Failed {
                    item_id,
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }
}

fn sidecar_exists(dest_path: &Path) -> bool {
    storage::exists(&storage::sidecar_path(dest_path))
}

/// No-checksum variant of the skip rule (spec §4.F.7): when a prior run's
/// sidecar records a completed transfer of `url` to `dest_path` and the
/// on-disk file still has the size that sidecar expects, skip without
/// opening any network connection. Without a checksum there is nothing
/// else to compare against an existing file, so the completed sidecar is
/// the only source of truth that the file is genuinely finished.
async fn skip_via_existing_sidecar(
    dest_path: &Path,
    url: &str,
    item_id: u64,
    observer: &Arc<dyn Observer>,
) -> Result<Option<DownloadReport>> {
    let sidecar_path = storage::sidecar_path(dest_path);
    if !storage::exists(&sidecar_path) {
        return Ok(None);
    }
    let existing = match storage::load(&sidecar_path) {
        Ok(state) => state,
        Err(_) => return Ok(None),
    };
    if existing.url != url || !existing.is_complete() {
        return Ok(None);
    }
    let metadata = match tokio::fs::metadata(dest_path).await {
        Ok(m) => m,
        Err(_) => return Ok(None),
    };
    let size_matches = existing.total_size.map(|t| t == metadata.len()).unwrap_or(true);
    if !size_matches {
        return Ok(None);
    }

    let _ = storage::delete(&sidecar_path);
    observer.on_event(Event::Skipped { item_id });
    Ok(Some(DownloadReport {
        outcome: DownloadOutcome::Skipped,
        retries: 0,
    }))
}

fn resume_or_plan(
    sidecar_path: &Path,
    url: &str,
    filename: &str,
    probe_result: &probe::ProbeResult,
    expected_checksum: Option<(ChecksumAlgorithm, String)>,
    worker_count: u32,
) -> Result<State> {
    if storage::exists(sidecar_path) {
        match storage::load(sidecar_path) {
            Ok(existing) if existing.matches(url, filename, probe_result.total_size) => {
                return Ok(existing);
            }
            _ => {
                // Mismatch or unreadable sidecar: discard and replan fresh.
                let _ = storage::delete(sidecar_path);
            }
        }
    }

    let chunks = planner::plan(probe_result.total_size, worker_count, probe_result.accept_range);
    let checksum = expected_checksum.map(|(algorithm, expected)| Checksum {
        algorithm,
        expected,
        actual: None,
    });
    let state = State::new(
        url.to_string(),
        filename.to_string(),
        probe_result.total_size,
        probe_result.accept_range,
        chunks,
        checksum,
    );
    storage::save(sidecar_path, &state).map_err(EngineError::from)?;
    Ok(state)
}

async fn preallocate(dest_path: &Path, total_size: Option<u64>) -> Result<()> {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(dest_path)
        .await
        .map_err(|e| EngineError::io(dest_path, e))?;
    if let Some(size) = total_size {
        file.set_len(size).await.map_err(|e| EngineError::io(dest_path, e))?;
    }
    Ok(())
}

async fn finalize(
    state: &State,
    sidecar_path: &Path,
    dest_path: &Path,
    observer: Arc<dyn Observer>,
    item_id: u64,
) -> Result<()> {
    if let Some(checksum) = &state.checksum {
        let mut streamer = ChecksumStreamer::new(checksum.algorithm);
        streamer.write(&tokio::fs::read(dest_path).await.map_err(|e| EngineError::io(dest_path, e))?);
        match streamer.verify(&checksum.expected) {
            Ok(_) => {
                let _ = storage::delete(sidecar_path);
                observer.on_event(Event::Completed { item_id });
                Ok(())
            }
            Err(err) => Err(err),
        }
    } else {
        let _ = storage::delete(sidecar_path);
        observer.on_event(Event::Completed { item_id });
        Ok(())
    }
}

fn spawn_progress_ticker(
    shared: Arc<SharedState>,
    observer: Arc<dyn Observer>,
    item_id: u64,
    tick: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut estimator = SpeedEstimator::new();
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let state = shared.state.lock().await.clone();
                    estimator.sample(state.downloaded());
                    let progress = estimator.snapshot(&state);
                    observer.on_event(Event::Progress { item_id, progress });
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}

fn constant_time_matches(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = DownloaderConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.read_idle_timeout, Duration::from_secs(60));
        assert_eq!(config.progress_tick, Duration::from_millis(200));
        assert_eq!(config.max_retries_per_chunk, 3);
    }

    #[test]
    fn constant_time_matches_rejects_different_lengths() {
        assert!(!constant_time_matches("abc", "abcd"));
    }

    #[tokio::test]
    async fn skip_via_existing_sidecar_matches_completed_same_size() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        tokio::fs::write(&dest, vec![0u8; 100]).await.unwrap();

        let chunk = storage::Chunk {
            id: 0,
            start: 0,
            end: 99,
            downloaded: 100,
            status: storage::ChunkStatus::Completed,
        };
        let state = storage::State::new(
            "https://example.com/file.bin".into(),
            "file.bin".into(),
            Some(100),
            true,
            vec![chunk],
            None,
        );
        storage::save(&dest, &state).unwrap();

        let observer: Arc<dyn Observer> = Arc::new(crate::progress::NullObserver);
        let report = skip_via_existing_sidecar(&dest, "https://example.com/file.bin", 1, &observer)
            .await
            .unwrap();
        assert!(matches!(
            report,
            Some(DownloadReport {
                outcome: DownloadOutcome::Skipped,
                ..
            })
        ));
        assert!(!storage::exists(&storage::sidecar_path(&dest)));
    }

    #[tokio::test]
    async fn skip_via_existing_sidecar_rejects_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        tokio::fs::write(&dest, vec![0u8; 50]).await.unwrap();

        let chunk = storage::Chunk {
            id: 0,
            start: 0,
            end: 99,
            downloaded: 100,
            status: storage::ChunkStatus::Completed,
        };
        let state = storage::State::new(
            "https://example.com/file.bin".into(),
            "file.bin".into(),
            Some(100),
            true,
            vec![chunk],
            None,
        );
        storage::save(&dest, &state).unwrap();

        let observer: Arc<dyn Observer> = Arc::new(crate::progress::NullObserver);
        let report = skip_via_existing_sidecar(&dest, "https://example.com/file.bin", 1, &observer)
            .await
            .unwrap();
        assert!(report.is_none());
    }

    #[test]
    fn constant_time_matches_accepts_equal_strings() {
        assert!(constant_time_matches("deadbeef", "deadbeef"));
    }
}
