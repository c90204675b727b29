//! Progress snapshot and the observer interface consumers register to
//! receive it (spec §3 "Progress snapshot", §9 "observer interface passed
//! in at construction, not process-wide state").

use std::time::{Duration, Instant};
use storage::{ChunkStatus, State};

/// Read-only per-chunk view inside a [`Progress`] snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ChunkProgress {
    pub id: u32,
    pub downloaded: u64,
    pub total: Option<u64>,
    pub status: ChunkStatus,
}

/// Immutable snapshot of one file transfer's byte and timing state.
#[derive(Debug, Clone)]
pub struct Progress {
    pub filename: String,
    pub downloaded: u64,
    pub total: Option<u64>,
    pub percent: Option<f64>,
    pub bytes_per_sec: f64,
    pub elapsed: Duration,
    pub eta: Option<Duration>,
    pub chunks: Vec<ChunkProgress>,
}

impl Progress {
    fn from_state(state: &State, bytes_per_sec: f64, elapsed: Duration) -> Self {
        let downloaded = state.downloaded();
        let percent = state.total_size.map(|t| {
            if t == 0 {
                100.0
            } else {
                (downloaded as f64 / t as f64) * 100.0
            }
        });
        let eta = match (state.total_size, bytes_per_sec) {
            (Some(total), speed) if speed > 0.0 && total > downloaded => {
                Some(Duration::from_secs_f64((total - downloaded) as f64 / speed))
            }
            _ => None,
        };
        let chunks = state
            .chunks
            .iter()
            .map(|c| ChunkProgress {
                id: c.id,
                downloaded: c.downloaded,
                total: c.size(),
                status: c.status,
            })
            .collect();

        Self {
            filename: state.filename.clone(),
            downloaded,
            total: state.total_size,
            percent,
            bytes_per_sec,
            elapsed,
            eta,
            chunks,
        }
    }
}

/// Exponentially weighted moving average over a rolling window, used to
/// smooth instantaneous transfer speed (spec §4.F.4).
pub struct SpeedEstimator {
    last_sample: Instant,
    last_bytes: u64,
    ewma: f64,
    start: Instant,
    alpha: f64,
}

impl SpeedEstimator {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            last_sample: now,
            last_bytes: 0,
            ewma: 0.0,
            start: now,
            alpha: 0.3,
        }
    }

    /// Fold in a new total-downloaded-bytes reading and return the smoothed
    /// rate. Samples less than the minimum window apart reuse the previous
    /// estimate rather than producing a noisy instantaneous spike.
    pub fn sample(&mut self, total_downloaded: u64) -> f64 {
        let now = Instant::now();
        let dt = now.duration_since(self.last_sample).as_secs_f64();
        if dt < 1.0 {
            return self.ewma;
        }
        let delta_bytes = total_downloaded.saturating_sub(self.last_bytes);
        let instantaneous = delta_bytes as f64 / dt;
        self.ewma = if self.ewma == 0.0 {
            instantaneous
        } else {
            self.alpha * instantaneous + (1.0 - self.alpha) * self.ewma
        };
        self.last_sample = now;
        self.last_bytes = total_downloaded;
        self.ewma
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn snapshot(&self, state: &State) -> Progress {
        Progress::from_state(state, self.ewma, self.elapsed())
    }
}

impl Default for SpeedEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// A lifecycle event delivered to the external renderer (spec §6 "Observer
/// callback").
#[derive(Debug, Clone)]
pub enum Event {
    Started { item_id: u64 },
    Progress { item_id: u64, progress: Progress },
    Completed { item_id: u64 },
    Failed { item_id: u64, reason: String },
    Skipped { item_id: u64 },
}

/// Callback observers implement to receive lifecycle events and progress
/// ticks. Passed in at construction rather than registered as global state.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: Event);
}

/// An observer that discards every event, for callers with no renderer.
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_event(&self, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::Chunk;

    fn sample_state() -> State {
        let chunks = vec![
            Chunk {
                id: 0,
                start: 0,
                end: 499,
                downloaded: 250,
                status: ChunkStatus::InProgress,
            },
            Chunk {
                id: 1,
                start: 500,
                end: 999,
                downloaded: 500,
                status: ChunkStatus::Completed,
            },
        ];
        State::new(
            "http://example.com/f".into(),
            "f".into(),
            Some(1000),
            true,
            chunks,
            None,
        )
    }

    #[test]
    fn progress_percent_matches_downloaded_ratio() {
        let state = sample_state();
        let progress = Progress::from_state(&state, 100.0, Duration::from_secs(5));
        assert_eq!(progress.downloaded, 750);
        assert_eq!(progress.percent, Some(75.0));
    }

    #[test]
    fn progress_eta_is_none_when_speed_is_zero() {
        let state = sample_state();
        let progress = Progress::from_state(&state, 0.0, Duration::from_secs(5));
        assert_eq!(progress.eta, None);
    }

    #[test]
    fn progress_eta_reflects_remaining_at_given_speed() {
        let state = sample_state();
        let progress = Progress::from_state(&state, 250.0, Duration::from_secs(5));
        assert_eq!(progress.eta, Some(Duration::from_secs(1)));
    }

    #[test]
    fn speed_estimator_ignores_samples_under_one_second() {
        let mut estimator = SpeedEstimator::new();
        let first = estimator.sample(1000);
        let second = estimator.sample(1000);
        assert_eq!(first, second);
    }

    #[test]
    fn null_observer_accepts_events_without_panicking() {
        let observer = NullObserver;
        observer.on_event(Event::Started { item_id: 1 });
        observer.on_event(Event::Skipped { item_id: 1 });
    }
}
