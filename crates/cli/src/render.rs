//! Terminal progress rendering: an [`engine::Observer`] that draws
//! `indicatif` bars from `Progress` snapshots (spec §6 "Observer callback").
//!
//! Grounded on the pack's `libretto-downloader::progress::ProgressTracker`
//! (shared multi-bar tracker plus a per-item handle), narrowed to a plain
//! `Observer` implementation since the engine defines that trait itself
//! rather than taking a concrete tracker type (spec §9 "observer interface
//! passed in at construction, not process-wide state").

use engine::{Event, Observer};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;

/// Draws one `indicatif` bar per in-flight item under a shared
/// `MultiProgress`, tagged by `QueueItem::id`.
pub struct CliObserver {
    multi: MultiProgress,
    bars: Mutex<HashMap<u64, ProgressBar>>,
    enabled: bool,
}

impl CliObserver {
    pub fn new(enabled: bool) -> Self {
        let multi = MultiProgress::new();
        if !enabled {
            multi.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            enabled,
        }
    }

    fn bar_style(total_known: bool) -> ProgressStyle {
        let template = if total_known {
            "{spinner:.green} {msg:<24} [{bar:30.cyan/blue}] {bytes:>10}/{total_bytes:<10} {bytes_per_sec:>12} eta {eta}"
        } else {
            "{spinner:.green} {msg:<24} {bytes:>10} downloaded {bytes_per_sec:>12}"
        };
        ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-")
    }

    fn bar_for(&self, item_id: u64, label: &str, total: Option<u64>) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap();
        bars.entry(item_id)
            .or_insert_with(|| {
                let pb = self.multi.add(ProgressBar::new(total.unwrap_or(0)));
                pb.set_style(Self::bar_style(total.is_some()));
                pb.set_message(label.to_string());
                pb
            })
            .clone()
    }

    fn finish(&self, item_id: u64, message: &'static str) {
        if let Some(pb) = self.bars.lock().unwrap().remove(&item_id) {
            pb.finish_with_message(message);
        }
    }
}

impl Observer for CliObserver {
    fn on_event(&self, event: Event) {
        if !self.enabled {
            return;
        }
        match event {
            Event::Started { item_id } => {
                self.bar_for(item_id, &format!("item {item_id}"), None);
            }
            Event::Progress { item_id, progress } => {
                let pb = self.bar_for(item_id, &progress.filename, progress.total);
                if let Some(total) = progress.total {
                    pb.set_length(total);
                }
                pb.set_message(progress.filename.clone());
                pb.set_position(progress.downloaded);
            }
            Event::Completed { item_id } => self.finish(item_id, "done"),
            Event::Skipped { item_id } => self.finish(item_id, "skipped (already complete)"),
            Event::Failed { item_id, reason } => {
                if let Some(pb) = self.bars.lock().unwrap().remove(&item_id) {
                    pb.abandon_with_message(format!("failed: {reason}"));
                }
            }
        }
    }
}
