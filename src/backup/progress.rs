//! Progress reporting for a run, counted in files scanned.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Receives `(processed, total)` after every scanned file.
///
/// Called on the thread running the backup. Implementations must return
/// quickly; a slow consumer stalls the run.
pub trait Progress: Send + Sync {
    fn update(&self, processed: usize, total: usize);

    fn reset(&self) {
        self.update(0, 0)
    }
}

impl<F: Fn(usize, usize) + Send + Sync> Progress for F {
    fn update(&self, processed: usize, total: usize) {
        self(processed, total)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn update(&self, _processed: usize, _total: usize) {}
}

/// Keeps only the latest value, for a UI that polls.
#[derive(Debug, Default)]
pub struct LatestProgress {
    processed: AtomicUsize,
    total: AtomicUsize,
}

impl LatestProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// The two counters are read separately; a snapshot taken mid-update can
    /// pair a new `processed` with the previous `total`.
    pub fn snapshot(&self) -> (usize, usize) {
        (
            self.processed.load(Ordering::Relaxed),
            self.total.load(Ordering::Relaxed),
        )
    }
}

impl Progress for LatestProgress {
    fn update(&self, processed: usize, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.processed.store(processed, Ordering::Relaxed);
    }
}

/// Emits progress as `tracing` debug events.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogProgress;

impl Progress for LogProgress {
    fn update(&self, processed: usize, total: usize) {
        tracing::debug!("Progress {processed}/{total}");
    }
}
