//! Append-only, human readable record of what the backup did.

use crate::backup::result_error::result::Result;

use chrono::Local;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub static LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub static RUN_STARTED: &str = "Backup started";
pub static RUN_COMPLETED: &str = "Backup created";
pub static RUN_FAILED: &str = "Backup failed";
pub static SPACE_EXCEEDED: &str = "Space exceeded! Backup not performed.";
pub static AUTOMATIC_STARTED: &str = "Automatic backup started.";
pub static AUTOMATIC_STOPPED: &str = "Automatic backup stopped.";

/// Sink for user facing events. Failing to record an event never affects a
/// backup, so `record` has no error path.
pub trait EventLog: Send + Sync {
    fn record(&self, message: &str);
}

/// `[YYYY-MM-DD HH:MM:SS] message`
pub fn format_line(message: &str) -> String {
    format!("[{}] {}", Local::now().format(LOG_TIME_FORMAT), message)
}

/// Appends one timestamped line per event to a text file.
#[derive(Debug)]
pub struct FileEventLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileEventLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, message: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "{}", format_line(message))?;
        Ok(())
    }
}

impl EventLog for FileEventLog {
    fn record(&self, message: &str) {
        if let Err(e) = self.append(message) {
            tracing::warn!("Cannot write event log {:?}: {e}", self.path);
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn record(&self, message: &str) {
        tracing::info!("{message}");
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages without timestamps, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl EventLog for MemoryEventLog {
    fn record(&self, message: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_format_line_timestamp() {
        let line = format_line("hello");
        assert!(line.ends_with("] hello"));
        let stamp = &line[1..20];
        assert!(NaiveDateTime::parse_from_str(stamp, LOG_TIME_FORMAT).is_ok());
    }

    #[test]
    fn test_file_event_log_appends() {
        let temp_dir = TempDir::new().unwrap();
        let log = FileEventLog::new(temp_dir.path().join("log.txt"));
        log.record(AUTOMATIC_STARTED);
        log.record(AUTOMATIC_STOPPED);

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with(AUTOMATIC_STARTED));
        assert!(lines[1].ends_with(AUTOMATIC_STOPPED));
    }

    #[test]
    fn test_file_event_log_unwritable_does_not_panic() {
        let temp_dir = TempDir::new().unwrap();
        let log = FileEventLog::new(temp_dir.path().join("missing/log.txt"));
        log.record(RUN_STARTED);
        assert!(!log.path().exists());
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_tracing_event_log_emits_info() {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            TracingEventLog.record(AUTOMATIC_STARTED);
        });

        let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("INFO"));
        assert!(output.contains(AUTOMATIC_STARTED));
    }

    #[test]
    fn test_memory_event_log() {
        let log = MemoryEventLog::new();
        log.record("a");
        log.record("b");
        assert_eq!(log.messages(), vec!["a", "b"]);
    }
}
