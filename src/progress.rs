//! Progress reporting for batch operations.
//!
//! The engine reports through the [`ProgressCallback`] trait; the binary plugs
//! in [`Progress`], which draws `indicatif` bars on stderr.
//!
//! Phases reported by a warm run:
//!
//! * `discover`: expanding glob patterns (spinner, total unknown)
//! * `warm`: ingesting the matched files (bar with throughput)

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Phase name for glob expansion.
pub const PHASE_DISCOVER: &str = "discover";
/// Phase name for ingestion of matched files.
pub const PHASE_WARM: &str = "warm";

/// Receives progress of a batch operation.
///
/// Implementations are called from worker threads.
pub trait ProgressCallback: Send + Sync {
    /// A phase starts with `total` items (0 when unknown).
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Item number `current` (1-based) was reached; `path` is the item.
    fn on_progress(&self, current: usize, path: &str);

    /// An item finished, with its size in bytes.
    fn on_item_completed(&self, _bytes: u64) {}

    /// A phase ended.
    fn on_phase_end(&self, phase: &str);

    /// Free-form status message.
    fn on_message(&self, _message: &str) {}
}

/// Terminal progress bars.
pub struct Progress {
    multi: MultiProgress,
    discover: Mutex<Option<ProgressBar>>,
    warm: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl Progress {
    /// Create a reporter; `quiet` suppresses all output.
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            discover: Mutex::new(None),
            warm: Mutex::new(None),
            quiet,
        }
    }

    fn discover_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
    }

    fn warm_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} ({percent}%) {msg} {per_sec} (ETA: {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    fn slot(&self, phase: &str) -> Option<&Mutex<Option<ProgressBar>>> {
        match phase {
            PHASE_DISCOVER => Some(&self.discover),
            PHASE_WARM => Some(&self.warm),
            _ => None,
        }
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }
        let Some(slot) = self.slot(phase) else {
            return;
        };

        let pb = if phase == PHASE_DISCOVER {
            let pb = self.multi.add(ProgressBar::new_spinner());
            pb.set_style(Self::discover_style());
            pb.set_message("Matching patterns");
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            let pb = self.multi.add(ProgressBar::new(total as u64));
            pb.set_style(Self::warm_style());
            pb.set_message("Caching");
            pb
        };
        *slot.lock().expect("progress mutex poisoned") = Some(pb);
    }

    fn on_progress(&self, current: usize, path: &str) {
        if self.quiet {
            return;
        }
        let msg = truncate_path(path, 30);
        if let Some(pb) = &*self.warm.lock().expect("progress mutex poisoned") {
            pb.set_position(current as u64);
            pb.set_message(msg);
        } else if let Some(pb) = &*self.discover.lock().expect("progress mutex poisoned") {
            pb.set_message(msg);
        }
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet {
            return;
        }
        let Some(slot) = self.slot(phase) else {
            return;
        };
        if let Some(pb) = slot.lock().expect("progress mutex poisoned").take() {
            let done = if phase == PHASE_DISCOVER {
                "Patterns matched"
            } else {
                "Caching complete"
            };
            pb.finish_with_message(done);
        }
    }

    fn on_message(&self, message: &str) {
        if self.quiet {
            return;
        }
        if let Some(pb) = &*self.warm.lock().expect("progress mutex poisoned") {
            pb.set_message(message.to_string());
        }
    }
}

/// Shorten a path to at most about `max_len` characters for display.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }

    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name_len = file_name.chars().count();
    if name_len + 4 > max_len {
        let keep = max_len.saturating_sub(3);
        let tail: String = file_name.chars().skip(name_len.saturating_sub(keep)).collect();
        return format!("...{tail}");
    }
    format!(".../{file_name}")
}
