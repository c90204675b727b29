//! Fetches one byte range, writes to its offset, updates state (spec §4.E).

use crate::error::{EngineError, Result};
use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use storage::{Chunk, ChunkStatus, State};

/// Persist state at least this often even without a size threshold being hit.
const SAVE_INTERVAL: Duration = Duration::from_secs(1);
/// Persist state whenever this many bytes accumulate since the last save.
const SAVE_BYTE_THRESHOLD: u64 = 1024 * 1024;
/// Default retry budget for transient chunk failures (spec §4.E step 7).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Outcome of running one chunk worker to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    Completed,
    Canceled,
}

/// Shared state mutated under a per-file mutex (spec §5 "State-Store saves
/// for a given file are serialized through a mutex held by the File
/// Downloader").
pub struct SharedState {
    pub state: Mutex<State>,
    pub sidecar_path: std::path::PathBuf,
    /// Total retry attempts across every chunk of this item (spec §3
    /// QueueItem "retry counter").
    pub retry_count: AtomicU32,
}

impl SharedState {
    async fn persist(&self) -> Result<()> {
        let guard = self.state.lock().await;
        storage::save(&self.sidecar_path, &guard).map_err(EngineError::from)
    }
}

/// Runs one chunk to completion, retrying transient failures with bounded
/// jittered exponential backoff (grounded on `chunked.rs`'s
/// `download_chunk_with_retry`, generalized with cancellation checks at
/// every suspension point per `piece_grabber.rs`'s `download_piece`).
pub async fn run_chunk(
    chunk_id: u32,
    client: Client,
    url: String,
    dest_path: Arc<std::path::PathBuf>,
    shared: Arc<SharedState>,
    cancel: CancellationToken,
    max_retries: u32,
) -> Result<WorkerOutcome> {
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Ok(WorkerOutcome::Canceled);
        }

        match run_chunk_once(chunk_id, &client, &url, &dest_path, &shared, &cancel).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) if err.is_retryable() && attempt < max_retries => {
                attempt += 1;
                shared.retry_count.fetch_add(1, Ordering::Relaxed);
                let backoff = jittered_backoff(attempt);
                tracing::warn!(chunk_id, attempt, ?backoff, error = %err, "chunk retry");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Ok(WorkerOutcome::Canceled),
                }
            }
            Err(err) => {
                mark_failed(&shared, chunk_id).await;
                return Err(err);
            }
        }
    }
}

async fn run_chunk_once(
    chunk_id: u32,
    client: &Client,
    url: &str,
    dest_path: &Path,
    shared: &Arc<SharedState>,
    cancel: &CancellationToken,
) -> Result<WorkerOutcome> {
    let (start, end, already_downloaded, total_size) = {
        let guard = shared.state.lock().await;
        let chunk = find_chunk(&guard, chunk_id)?;
        (chunk.start, chunk.end, chunk.downloaded, guard.total_size)
    };

    let resume_from = start + already_downloaded;

    // Step 2: chunk already fully covered.
    if end >= 0 && resume_from > end as u64 {
        set_chunk_status(shared, chunk_id, ChunkStatus::Completed, already_downloaded).await?;
        return Ok(WorkerOutcome::Completed);
    }

    set_chunk_status(shared, chunk_id, ChunkStatus::InProgress, already_downloaded).await?;

    let mut request = client.get(url);
    let whole_file_unranged = end < 0 && resume_from == 0;
    if !whole_file_unranged {
        let range = if end < 0 {
            format!("bytes={resume_from}-")
        } else {
            format!("bytes={resume_from}-{end}")
        };
        request = request.header(reqwest::header::RANGE, range);
    }

    let response = request.send().await.map_err(EngineError::from)?;
    let status = response.status();

    let expects_partial = !whole_file_unranged;
    // A 200 for a ranged request is only acceptable when the chunk covers
    // the entire file (spec §4.E step 4: "only acceptable if chunk covers
    // [0, T-1] and the prior downloaded count is 0"), not merely when this
    // chunk happens to start at offset 0 with an unset end. The planner
    // never hands out such a chunk (a known-size multi-chunk plan always
    // bounds every chunk's end), so this should only fire for a genuinely
    // whole-file bounded chunk.
    let covers_whole_file = start == 0
        && end >= 0
        && total_size
            .map(|t| t > 0 && end as u64 == t - 1)
            .unwrap_or(false);
    if expects_partial && status.as_u16() != 206 {
        if status.as_u16() == 200 && resume_from == 0 && covers_whole_file {
            // Acceptable per spec §4.E step 4's note: a 200 is tolerated for
            // a ranged request only when the chunk spans the whole file and
            // no bytes were previously downloaded.
        } else if !status.is_success() {
            return Err(EngineError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        } else {
            return Err(EngineError::InvalidResponse(format!(
                "expected 206 Partial Content for chunk {chunk_id}, got {status}"
            )));
        }
    } else if !status.is_success() && status.as_u16() != 206 {
        return Err(EngineError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let mut file = File::options()
        .write(true)
        .open(dest_path)
        .await
        .map_err(|e| EngineError::io(dest_path, e))?;
    file.seek(std::io::SeekFrom::Start(resume_from))
        .await
        .map_err(|e| EngineError::io(dest_path, e))?;

    let mut stream = response.bytes_stream();
    let mut downloaded = already_downloaded;
    let mut unsaved_bytes = 0u64;
    let mut last_save = Instant::now();
    let unknown_end = end < 0;
    let mut observed_total = resume_from;

    while let Some(item) = stream.next().await {
        if cancel.is_cancelled() {
            persist_progress(shared, chunk_id, downloaded, ChunkStatus::InProgress).await?;
            return Ok(WorkerOutcome::Canceled);
        }

        let bytes = item.map_err(EngineError::from)?;
        file.write_all(&bytes)
            .await
            .map_err(|e| EngineError::io(dest_path, e))?;

        downloaded += bytes.len() as u64;
        observed_total += bytes.len() as u64;
        unsaved_bytes += bytes.len() as u64;

        if unsaved_bytes >= SAVE_BYTE_THRESHOLD || last_save.elapsed() >= SAVE_INTERVAL {
            persist_progress(shared, chunk_id, downloaded, ChunkStatus::InProgress).await?;
            unsaved_bytes = 0;
            last_save = Instant::now();
        }

        if cancel.is_cancelled() {
            file.flush().await.map_err(|e| EngineError::io(dest_path, e))?;
            persist_progress(shared, chunk_id, downloaded, ChunkStatus::InProgress).await?;
            return Ok(WorkerOutcome::Canceled);
        }
    }

    file.flush().await.map_err(|e| EngineError::io(dest_path, e))?;

    if unknown_end {
        // Unknown-size chunk: the observed byte count becomes the file's
        // total size (spec §4.E "total size is then set to the observed
        // byte count").
        let mut guard = shared.state.lock().await;
        guard.total_size = Some(observed_total);
        let chunk = find_chunk_mut(&mut guard, chunk_id)?;
        chunk.end = (observed_total.saturating_sub(1)) as i64;
        chunk.downloaded = downloaded;
        chunk.status = ChunkStatus::Completed;
        guard.updated_at = chrono::Utc::now();
        drop(guard);
        shared.persist().await?;
        return Ok(WorkerOutcome::Completed);
    }

    let expected_size = (end - start as i64 + 1) as u64;
    if downloaded != expected_size {
        // Server truncated the body but closed cleanly; treat as transient
        // unless the byte count genuinely matches (spec §4.E tie-break).
        return Err(EngineError::NetworkError(format!(
            "chunk {chunk_id} ended early: got {downloaded} of {expected_size} bytes"
        )));
    }

    set_chunk_status(shared, chunk_id, ChunkStatus::Completed, downloaded).await?;
    Ok(WorkerOutcome::Completed)
}

async fn persist_progress(
    shared: &Arc<SharedState>,
    chunk_id: u32,
    downloaded: u64,
    status: ChunkStatus,
) -> Result<()> {
    {
        let mut guard = shared.state.lock().await;
        let chunk = find_chunk_mut(&mut guard, chunk_id)?;
        chunk.downloaded = downloaded;
        chunk.status = status;
        guard.updated_at = chrono::Utc::now();
    }
    shared.persist().await
}

async fn set_chunk_status(
    shared: &Arc<SharedState>,
    chunk_id: u32,
    status: ChunkStatus,
    downloaded: u64,
) -> Result<()> {
    persist_progress(shared, chunk_id, downloaded, status).await
}

async fn mark_failed(shared: &Arc<SharedState>, chunk_id: u32) {
    let mut guard = shared.state.lock().await;
    if let Ok(chunk) = find_chunk_mut(&mut guard, chunk_id) {
        chunk.status = ChunkStatus::Failed;
    }
}

fn find_chunk(state: &State, chunk_id: u32) -> Result<&Chunk> {
    state
        .chunks
        .iter()
        .find(|c| c.id == chunk_id)
        .ok_or_else(|| EngineError::StateCorrupt(format!("missing chunk {chunk_id}")))
}

fn find_chunk_mut(state: &mut State, chunk_id: u32) -> Result<&mut Chunk> {
    state
        .chunks
        .iter_mut()
        .find(|c| c.id == chunk_id)
        .ok_or_else(|| EngineError::StateCorrupt(format!("missing chunk {chunk_id}")))
}

fn jittered_backoff(attempt: u32) -> Duration {
    let base_ms = 500u64.saturating_mul(1u64 << attempt.min(6));
    let jitter = base_ms / 4;
    let offset = (attempt as u64 * 97) % (jitter.max(1));
    Duration::from_millis(base_ms + offset)
}
