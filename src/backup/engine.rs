//! One backup run: walk, filter, guard, write, commit.

use crate::backup::archive::{root_labels, ArchiveHandle, ArchiveWriter};
use crate::backup::backup_config::BackupConfig;
use crate::backup::change_tracker::ChangeTracker;
use crate::backup::event_log::{self, EventLog};
use crate::backup::progress::Progress;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::WithMsg;
use crate::backup::space_guard::SpaceGuard;
use crate::backup::walk::{FileRecord, PathWalker};

use chrono::{DateTime, Local, TimeZone};
use derive_more::Display;
use getset::{CopyGetters, Getters};
use itertools::Itertools;

use std::fmt::Display as FmtDisplay;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::JoinHandle;
use std::time::SystemTime;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Walking,
    Filtering,
    Guarding,
    Writing,
    Committing,
    Done,
    Failed,
}

/// Outcome of a completed run.
#[derive(Debug, Getters, CopyGetters)]
pub struct RunReport {
    #[getset(get = "pub")]
    archive_path: PathBuf,
    #[getset(get_copy = "pub")]
    files_total: usize,
    #[getset(get_copy = "pub")]
    files_selected: usize,
    #[getset(get_copy = "pub")]
    files_written: usize,
    /// Files or subtrees that were skipped.
    #[getset(get = "pub")]
    non_fatal_error: Option<Error>,
}

#[derive(Clone, Debug, Default)]
struct Targets {
    sources: Vec<PathBuf>,
    destination: Option<PathBuf>,
}

/// Counts files scanned and forwards each step to the progress sink.
struct RunProgress<'a> {
    sink: &'a dyn Progress,
    processed: usize,
    total: usize,
}

impl RunProgress<'_> {
    fn advance(&mut self) {
        self.processed += 1;
        self.sink.update(self.processed, self.total);
    }
}

/// Runs backups of the configured sources into the destination.
///
/// At most one run executes at a time; the [`ChangeTracker`] lock doubles as
/// the run lock, so a second caller gets [`Error::AlreadyRunning`] instead of
/// waiting.
pub struct BackupEngine {
    targets: Mutex<Targets>,
    walker: PathWalker,
    writer: ArchiveWriter,
    guard: SpaceGuard,
    quota_mb: AtomicU64,
    tracker: Mutex<ChangeTracker>,
    state_file: Option<PathBuf>,
    phase: Mutex<RunPhase>,
    progress: Arc<dyn Progress>,
    event_log: Arc<dyn EventLog>,
}

impl BackupEngine {
    /// Loads the change tracker from the configured state file, if any.
    pub fn from_config(
        config: &BackupConfig,
        progress: Arc<dyn Progress>,
        event_log: Arc<dyn EventLog>,
    ) -> Result<Self> {
        let tracker = match config.state_file() {
            Some(path) => ChangeTracker::load(path)?,
            None => ChangeTracker::new(),
        };

        Ok(Self {
            targets: Mutex::new(Targets {
                sources: config.sources().clone(),
                destination: Some(config.destination().clone()),
            }),
            walker: PathWalker::new(config.follow_symlinks()),
            writer: ArchiveWriter::new(config.compressor().clone()),
            guard: SpaceGuard,
            quota_mb: AtomicU64::new(config.quota_mb()),
            tracker: Mutex::new(tracker),
            state_file: config.state_file().clone(),
            phase: Mutex::new(RunPhase::Idle),
            progress,
            event_log,
        })
    }

    pub fn add_source<P: Into<PathBuf>>(&self, source: P) {
        lock(&self.targets).sources.push(source.into());
    }

    pub fn clear_sources(&self) {
        lock(&self.targets).sources.clear();
    }

    pub fn sources(&self) -> Vec<PathBuf> {
        lock(&self.targets).sources.clone()
    }

    pub fn set_destination<P: Into<PathBuf>>(&self, destination: P) {
        lock(&self.targets).destination = Some(destination.into());
    }

    pub fn destination(&self) -> Option<PathBuf> {
        lock(&self.targets).destination.clone()
    }

    pub fn quota_mb(&self) -> u64 {
        self.quota_mb.load(Ordering::Relaxed)
    }

    pub fn set_quota_mb(&self, quota_mb: u64) {
        self.quota_mb.store(quota_mb, Ordering::Relaxed);
    }

    pub fn phase(&self) -> RunPhase {
        *lock(&self.phase)
    }

    /// Copy of the change tracker. Blocks while a run is in progress.
    pub fn tracker_snapshot(&self) -> ChangeTracker {
        lock(&self.tracker).clone()
    }

    /// Fails with [`Error::Configuration`] unless at least one source and a
    /// destination are set.
    pub fn check_targets(&self) -> Result<()> {
        let targets = lock(&self.targets);
        if targets.sources.is_empty() {
            return Err(Error::configuration("No source directory configured"));
        }
        if targets.destination.is_none() {
            return Err(Error::configuration("No destination directory configured"));
        }
        Ok(())
    }

    /// Checks destination usage against `quota_mb` without starting a run.
    /// A refusal is recorded in the event log.
    pub fn check_quota(&self, quota_mb: u64) -> Result<f64> {
        let res = self
            .destination()
            .ok_or_else(|| Error::configuration("No destination directory configured"))
            .and_then(|destination| self.guard.check(destination, quota_mb));
        if let Err(e) = &res {
            self.record_failure(e);
        }
        res
    }

    /// Runs a backup now with the engine's own quota.
    pub fn run(&self) -> Result<RunReport> {
        self.run_at(&Local::now(), self.quota_mb())
    }

    /// Runs a manual backup on its own thread.
    pub fn spawn_run(self: &Arc<Self>) -> Result<JoinHandle<Result<RunReport>>> {
        let engine = self.clone();
        std::thread::Builder::new()
            .name("backup-manual".into())
            .spawn(move || engine.run())
            .map_err(Error::from)
    }

    /// Runs a backup whose archive is named after `dt`.
    pub fn run_at<O: FmtDisplay, T: TimeZone<Offset = O>>(
        &self,
        dt: &DateTime<T>,
        quota_mb: u64,
    ) -> Result<RunReport> {
        let res = self.try_run(dt, quota_mb);
        match &res {
            Ok(report) => {
                self.event_log.record(&format!(
                    "{}: {}",
                    event_log::RUN_COMPLETED,
                    report.archive_path.display()
                ));
                tracing::info!(
                    "Created backup file {:?} with {} of {} files",
                    report.archive_path,
                    report.files_written,
                    report.files_total
                );
                if let Some(e) = &report.non_fatal_error {
                    tracing::warn!("Received non fatal error: {e}");
                }
            }
            Err(e) => self.record_failure(e),
        }
        res
    }

    fn record_failure(&self, e: &Error) {
        match e.root() {
            Error::CapacityExceeded { usage_mb, quota_mb } => {
                tracing::warn!("{e}");
                self.event_log.record(&format!(
                    "{} ({:.2} MB of {} MB)",
                    event_log::SPACE_EXCEEDED,
                    usage_mb,
                    quota_mb
                ));
            }
            _ => {
                tracing::error!("Backup failed: {e}");
                self.event_log
                    .record(&format!("{}: {}", event_log::RUN_FAILED, e.root()));
            }
        }
    }

    fn try_run<O: FmtDisplay, T: TimeZone<Offset = O>>(
        &self,
        dt: &DateTime<T>,
        quota_mb: u64,
    ) -> Result<RunReport> {
        let mut tracker = match self.tracker.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(Error::AlreadyRunning),
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
        };

        self.check_targets()?;
        let Targets {
            sources,
            destination,
        } = lock(&self.targets).clone();
        let destination = destination
            .ok_or_else(|| Error::configuration("No destination directory configured"))?;

        self.event_log.record(event_log::RUN_STARTED);
        tracing::info!("Trying to create backup...");

        let res = self.run_phases(&mut tracker, &sources, &destination, dt, quota_mb);
        self.progress.reset();
        self.set_phase(match res {
            Ok(_) => RunPhase::Done,
            Err(_) => RunPhase::Failed,
        });
        self.set_phase(RunPhase::Idle);
        res
    }

    fn run_phases<O: FmtDisplay, T: TimeZone<Offset = O>>(
        &self,
        tracker: &mut ChangeTracker,
        sources: &[PathBuf],
        destination: &Path,
        dt: &DateTime<T>,
        quota_mb: u64,
    ) -> Result<RunReport> {
        let mut warnings = Vec::new();

        self.set_phase(RunPhase::Walking);
        let sources = sources.iter().unique().collect_vec();
        let records = self.walk_sources(&sources, &mut warnings);
        let mut progress = RunProgress {
            sink: self.progress.as_ref(),
            processed: 0,
            total: records.len(),
        };
        progress.sink.update(0, progress.total);

        self.set_phase(RunPhase::Filtering);
        let mut selected = Vec::new();
        for (label, record) in records {
            if tracker.should_include(record.path(), record.modified()) {
                selected.push((label, record));
            } else {
                tracing::trace!("Unchanged since last archive: {:?}", record.path());
                progress.advance();
            }
        }
        tracing::info!(
            "Selected {} of {} files for archiving",
            selected.len(),
            progress.total
        );

        self.set_phase(RunPhase::Guarding);
        let usage_mb = self.guard.check(destination, quota_mb)?;
        tracing::debug!("Destination usage {usage_mb:.2} MB of {quota_mb} MB");

        self.set_phase(RunPhase::Writing);
        let mut handle = self.writer.begin(destination, dt)?;
        let files_selected = selected.len();
        let staged = write_selected(&mut handle, selected, &mut progress, &mut warnings)?;

        self.set_phase(RunPhase::Committing);
        let archive_path = handle.finalize()?;
        let files_written = staged.len();
        for (path, modified) in staged {
            tracker.commit(path, modified);
        }
        if let Some(state_file) = &self.state_file {
            if let Err(e) = tracker.save(state_file) {
                warnings.push(e.with_msg("Saving change tracker state failed"));
            }
        }

        Ok(RunReport {
            archive_path,
            files_total: progress.total,
            files_selected,
            files_written,
            non_fatal_error: convert_error_vec(warnings).err(),
        })
    }

    /// Every file of every root, paired with the archive path it would get.
    fn walk_sources(
        &self,
        sources: &[&PathBuf],
        warnings: &mut Vec<Error>,
    ) -> Vec<(PathBuf, FileRecord)> {
        let mut records = Vec::new();
        for (root, label) in sources.iter().zip(root_labels(sources)) {
            for res in self.walker.walk(root) {
                match res {
                    Ok(record) => {
                        let name = label.join(record.relative_path());
                        records.push((name, record));
                    }
                    Err(e) => {
                        tracing::warn!("Ignoring entry under {:?}: {e}", root);
                        warnings.push(e);
                    }
                }
            }
        }
        records
    }

    fn set_phase(&self, phase: RunPhase) {
        tracing::debug!("Backup phase {phase}");
        *lock(&self.phase) = phase;
    }
}

/// Streams the selected files and returns the `(path, mtime)` pairs that made
/// it into the archive. A file that cannot be opened or shrinks while being
/// read is skipped; any other failure aborts the run.
fn write_selected(
    handle: &mut ArchiveHandle,
    selected: Vec<(PathBuf, FileRecord)>,
    progress: &mut RunProgress,
    warnings: &mut Vec<Error>,
) -> Result<Vec<(PathBuf, SystemTime)>> {
    let mut staged = Vec::with_capacity(selected.len());
    for (name, record) in selected {
        match handle.add_file(record.path(), &name) {
            Ok(()) => staged.push((record.path().clone(), record.modified())),
            Err(e) if e.is_file_level() => {
                tracing::warn!("Skipping file: {e}");
                warnings.push(e);
            }
            Err(e) => return Err(e.with_msg("Archive left incomplete")),
        }
        progress.advance();
    }
    Ok(staged)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
