//! Drives a list of downloads with a global concurrency bound and lifecycle
//! events (spec §4.G).

use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::checksum::ChecksumStreamer;
use crate::downloader::{DownloadOutcome, DownloadReport, DownloaderConfig, FileDownloader};
use crate::error::{EngineError, Result};
use crate::progress::{Event, Observer};

/// Lifecycle of one queued download (spec §3 "QueueItem").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Skipped,
    Canceled,
}

/// One planned download (spec §3 "QueueItem").
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: u64,
    pub url: String,
    pub dest_path: PathBuf,
    pub expected_checksum: Option<String>,
    pub status: ItemStatus,
    pub error: Option<String>,
    pub downloaded: u64,
    pub total: Option<u64>,
    pub retries: u32,
}

/// Aggregate counts over the queue's current items (spec §8 scenario 5).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Stats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub canceled: usize,
    pub pending: usize,
}

/// Drives a FIFO-ordered list of [`QueueItem`]s with a bounded global
/// concurrency `K` (spec §4.G). Grounded on `libretto-downloader`'s
/// `ParallelDownloader`, narrowed from package-manager concerns to the
/// chunked-file-transfer engine's own item model.
pub struct QueueManager {
    items: Arc<DashMap<u64, QueueItem>>,
    order: std::sync::Mutex<Vec<u64>>,
    next_id: AtomicU64,
    concurrency: usize,
    downloader_config: DownloaderConfig,
    cancel: CancellationToken,
    observer: Arc<dyn Observer>,
    output_dir: PathBuf,
}

impl QueueManager {
    pub fn new(concurrency: usize, downloader_config: DownloaderConfig, observer: Arc<dyn Observer>) -> Self {
        Self {
            items: Arc::new(DashMap::new()),
            order: std::sync::Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            concurrency: concurrency.max(1),
            downloader_config,
            cancel: CancellationToken::new(),
            observer,
            output_dir: platform::default_download_dir(),
        }
    }

    /// Validate and enqueue one URL (spec §4.G `add`).
    ///
    /// `add` never treats a `#`-prefixed input as a silent no-op comment
    /// (spec §12.3): it is rejected as `InvalidUrl` like any other
    /// malformed input. Comment filtering is exclusively a
    /// [`QueueManager::load_from_file`] concern.
    pub fn add(
        &self,
        url: &str,
        output_path: Option<PathBuf>,
        checksum: Option<String>,
    ) -> Result<u64> {
        let url = url.trim();
        if url.is_empty() || url.starts_with('#') {
            return Err(EngineError::InvalidUrl(url.to_string()));
        }
        let parsed = Url::parse(url)?;
        if parsed.host_str().is_none() {
            return Err(EngineError::InvalidUrl(url.to_string()));
        }
        if let Some(sum) = &checksum {
            ChecksumStreamer::parse_checksum_string(sum)?;
        }

        let dest_path = output_path.unwrap_or_else(|| self.output_dir.join(derive_filename(&parsed)));

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let item = QueueItem {
            id,
            url: url.to_string(),
            dest_path,
            expected_checksum: checksum,
            status: ItemStatus::Pending,
            error: None,
            downloaded: 0,
            total: None,
            retries: 0,
        };
        self.items.insert(id, item);
        self.order.lock().unwrap().push(id);
        Ok(id)
    }

    /// Load and enqueue every non-empty, non-comment line of `path` (spec
    /// §4.G `loadFromFile`, §6 "Input list format").
    ///
    /// Each line is either space-separated `URL [OUTPUT_PATH [ALG:HEX]]` or
    /// pipe-separated `URL|OUTPUT_PATH|ALG:HEX`. The dialect is chosen
    /// per-line by trying pipe first when the line contains `|`, falling
    /// back to whitespace splitting otherwise (spec §12.2); a URL whose
    /// query string legitimately contains `|` must be added via
    /// [`QueueManager::add`] directly.
    pub async fn load_from_file(&self, path: &std::path::Path) -> Result<Vec<u64>> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::io(path, e))?;

        let mut ids = Vec::new();
        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = if line.contains('|') {
                line.split('|').map(str::trim).collect()
            } else {
                line.split_whitespace().collect()
            };

            let url = fields.first().copied().unwrap_or("");
            let output_path = fields.get(1).filter(|s| !s.is_empty()).map(PathBuf::from);
            let checksum = fields.get(2).filter(|s| !s.is_empty()).map(|s| s.to_string());

            let id = self.add(url, output_path, checksum).map_err(|e| {
                EngineError::InvalidUrl(format!("line {}: {e}", line_no + 1))
            })?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Drive every *Pending* item with up to `K` concurrent File
    /// Downloaders (spec §4.G `run`), emitting lifecycle events through the
    /// registered observer. Returns once every item has reached a terminal
    /// status.
    pub async fn run(&self) -> Result<()> {
        let pending_ids: Vec<u64> = {
            let order = self.order.lock().unwrap();
            order
                .iter()
                .copied()
                .filter(|id| {
                    self.items
                        .get(id)
                        .map(|item| item.status == ItemStatus::Pending)
                        .unwrap_or(false)
                })
                .collect()
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let downloader = Arc::new(FileDownloader::new(self.downloader_config.clone())?);

        stream::iter(pending_ids)
            .for_each_concurrent(self.concurrency, |id| {
                let semaphore = semaphore.clone();
                let downloader = downloader.clone();
                let cancel = self.cancel.child_token();
                let observer = self.observer.clone();
                async move {
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    self.run_one(id, downloader, cancel, observer).await;
                }
            })
            .await;

        Ok(())
    }

    async fn run_one(
        &self,
        id: u64,
        downloader: Arc<FileDownloader>,
        cancel: CancellationToken,
        observer: Arc<dyn Observer>,
    ) {
        let (url, dest_path, checksum_str) = {
            let mut item = match self.items.get_mut(&id) {
                Some(item) => item,
                None => return,
            };
            item.status = ItemStatus::Downloading;
            (item.url.clone(), item.dest_path.clone(), item.expected_checksum.clone())
        };

        let expected_checksum = match checksum_str.as_deref().map(ChecksumStreamer::parse_checksum_string) {
            Some(Ok(parsed)) => Some(parsed),
            Some(Err(_)) | None => None,
        };

        let tracking_observer: Arc<dyn Observer> = Arc::new(ItemTrackingObserver {
            item_id: id,
            items: self.items.clone(),
            inner: observer.clone(),
        });

        let outcome = downloader
            .run(id, &url, &dest_path, expected_checksum, cancel, tracking_observer)
            .await;

        let mut item = match self.items.get_mut(&id) {
            Some(item) => item,
            None => return,
        };
        match outcome {
            Ok(report) => {
                item.retries = report.retries;
                item.status = match report.outcome {
                    DownloadOutcome::Completed => ItemStatus::Completed,
                    DownloadOutcome::Skipped => ItemStatus::Skipped,
                    DownloadOutcome::Canceled => ItemStatus::Canceled,
                };
            }
            Err(err) => {
                item.status = ItemStatus::Failed;
                item.error = Some(err.to_string());
                observer.on_event(Event::Failed {
                    item_id: id,
                    reason: item.error.clone().unwrap_or_default(),
                });
            }
        }
    }

    /// Cancel the root token and let `run()` drain every in-flight
    /// downloader (spec §4.G `stop`).
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Current snapshot of one item by ID.
    pub fn item(&self, id: u64) -> Option<QueueItem> {
        self.items.get(&id).map(|entry| entry.clone())
    }

    /// Aggregate counts across every item (spec §8 scenario 5).
    pub fn stats(&self) -> Stats {
        let mut stats = Stats::default();
        for entry in self.items.iter() {
            stats.total += 1;
            match entry.status {
                ItemStatus::Completed => stats.completed += 1,
                ItemStatus::Failed => stats.failed += 1,
                ItemStatus::Skipped => stats.skipped += 1,
                ItemStatus::Canceled => stats.canceled += 1,
                ItemStatus::Pending | ItemStatus::Downloading => stats.pending += 1,
            }
        }
        stats
    }
}

/// Wraps the caller-supplied [`Observer`] so `QueueItem::downloaded`/`total`
/// stay current for diagnostics (e.g. `--format json`) without requiring
/// every observer implementation to track that itself; forwards every event
/// unchanged to `inner` (spec §3 QueueItem "running downloaded-bytes count,
/// total-bytes").
struct ItemTrackingObserver {
    item_id: u64,
    items: Arc<DashMap<u64, QueueItem>>,
    inner: Arc<dyn Observer>,
}

impl Observer for ItemTrackingObserver {
    fn on_event(&self, event: Event) {
        if let Event::Progress { progress, .. } = &event {
            if let Some(mut item) = self.items.get_mut(&self.item_id) {
                item.downloaded = progress.downloaded;
                item.total = progress.total;
            }
        }
        self.inner.on_event(event);
    }
}

/// Derive a destination filename from a URL's last path segment,
/// URL-decoded, falling back to `download` (spec §4.G `add`).
fn derive_filename(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|segment| {
            percent_decode(segment)
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "download".to_string())
}

fn percent_decode(s: &str) -> String {
    percent_encoding_decode(s)
}

fn percent_encoding_decode(s: &str) -> String {
    let mut bytes = Vec::with_capacity(s.len());
    let mut chars = s.bytes().peekable();
    while let Some(b) = chars.next() {
        if b == b'%' {
            let hi = chars.next();
            let lo = chars.next();
            if let (Some(hi), Some(lo)) = (hi, lo) {
                if let (Some(hi), Some(lo)) = (hex_digit(hi), hex_digit(lo)) {
                    bytes.push(hi * 16 + lo);
                    continue;
                }
            }
            bytes.push(b);
        } else {
            bytes.push(b);
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
