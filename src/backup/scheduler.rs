//! Automatic mode: a run every interval until stopped.

use crate::backup::engine::BackupEngine;
use crate::backup::event_log::{self, EventLog};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::validate::parse_positive;

use chrono::Local;

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

/// Stop signal shared between [`Scheduler`] and its loop thread.
///
/// The loop checks it before each run and waits on it between runs, so a stop
/// takes effect at once unless a run is in progress, in which case the run
/// finishes first.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (cancelled, cvar) = &*self.inner;
        *lock(cancelled) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *lock(&self.inner.0)
    }

    /// Sleeps up to `timeout`. Returns true if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (cancelled, cvar) = &*self.inner;
        let guard = lock(cancelled);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |c| !*c)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

#[derive(Debug)]
struct Active {
    token: CancellationToken,
    interval: Duration,
    quota_mb: u64,
}

pub struct Scheduler {
    engine: Arc<BackupEngine>,
    event_log: Arc<dyn EventLog>,
    active: Mutex<Option<Active>>,
    last_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(engine: Arc<BackupEngine>, event_log: Arc<dyn EventLog>) -> Self {
        Self {
            engine,
            event_log,
            active: Mutex::new(None),
            last_loop: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<BackupEngine> {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Interval and quota of the current automatic mode.
    pub fn settings(&self) -> Option<(Duration, u64)> {
        lock(&self.active)
            .as_ref()
            .map(|a| (a.interval, a.quota_mb))
    }

    /// Starts automatic mode with a first run right away.
    pub fn start(&self, interval: Duration, quota_mb: u64) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::configuration("Interval must be positive"));
        }
        if quota_mb == 0 {
            return Err(Error::configuration("Quota must be positive"));
        }
        self.engine.check_targets()?;

        let mut active = lock(&self.active);
        if active.is_some() {
            return Err(Error::SchedulerAlreadyRunning);
        }

        let token = CancellationToken::new();
        let engine = self.engine.clone();
        let loop_token = token.clone();
        let handle = std::thread::Builder::new()
            .name("backup-scheduler".into())
            .spawn(move || run_loop(engine, loop_token, interval, quota_mb))?;

        *active = Some(Active {
            token,
            interval,
            quota_mb,
        });
        *lock(&self.last_loop) = Some(handle);
        self.event_log.record(event_log::AUTOMATIC_STARTED);
        tracing::info!("Automatic backup every {interval:?} with quota {quota_mb} MB");
        Ok(())
    }

    /// Stops automatic mode. Returns false if it was not running.
    ///
    /// Does not wait for the loop thread; see [`Scheduler::wait`].
    pub fn stop(&self) -> bool {
        match lock(&self.active).take() {
            Some(active) => {
                active.token.cancel();
                self.event_log.record(event_log::AUTOMATIC_STOPPED);
                tracing::info!("Automatic backup stopped");
                true
            }
            None => false,
        }
    }

    /// Starts automatic mode when stopped, stops it when running, and returns
    /// the new state. Inputs are only parsed when starting; invalid input
    /// leaves the scheduler stopped.
    pub fn toggle<S1: AsRef<str>, S2: AsRef<str>>(
        &self,
        interval_minutes: S1,
        quota_mb: S2,
    ) -> Result<bool> {
        if self.stop() {
            return Ok(false);
        }

        let minutes = parse_positive(interval_minutes, "Interval in minutes")?;
        let quota_mb = parse_positive(quota_mb, "Quota in MB")?;
        let secs = minutes.checked_mul(60).ok_or_else(|| {
            Error::configuration(format!("Interval {minutes} minutes is too long"))
        })?;
        self.start(Duration::from_secs(secs), quota_mb)?;
        Ok(true)
    }

    /// Blocks until the most recently started loop thread has exited.
    pub fn wait(&self) {
        let handle = lock(&self.last_loop).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Scheduler thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(active) = lock(&self.active).take() {
            active.token.cancel();
        }
    }
}

fn run_loop(
    engine: Arc<BackupEngine>,
    token: CancellationToken,
    interval: Duration,
    quota_mb: u64,
) {
    loop {
        if token.is_cancelled() {
            break;
        }

        // Failures are already recorded by the engine; the next tick retries.
        let res = engine
            .check_quota(quota_mb)
            .and_then(|_| engine.run_at(&Local::now(), quota_mb));
        match res {
            Ok(report) => tracing::debug!("Scheduled backup wrote {:?}", report.archive_path()),
            Err(e) if e.is_capacity_exceeded() => tracing::info!("Scheduled backup skipped"),
            Err(e) => tracing::warn!("Scheduled backup failed: {e}"),
        }

        tracing::info!("Sleeping for {interval:?}");
        if token.wait_timeout(interval) {
            break;
        }
    }
    tracing::debug!("Scheduler loop exited");
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
