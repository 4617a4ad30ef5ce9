//! Per-file record of the modification time last written into an archive.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Decides whether a file needs to go into the next archive.
///
/// Not synchronised; [`BackupEngine`](crate::backup::engine::BackupEngine)
/// only touches it while holding its run lock.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeTracker {
    archived: BTreeMap<PathBuf, SystemTime>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `path` was never archived or `modified` is strictly newer than
    /// the recorded time.
    pub fn should_include<P: AsRef<Path>>(&self, path: P, modified: SystemTime) -> bool {
        match self.archived.get(path.as_ref()) {
            None => true,
            Some(recorded) => modified > *recorded,
        }
    }

    /// Records `modified` for `path`, replacing any previous value.
    pub fn commit<P: Into<PathBuf>>(&mut self, path: P, modified: SystemTime) {
        self.archived.insert(path.into(), modified);
    }

    pub fn get<P: AsRef<Path>>(&self, path: P) -> Option<SystemTime> {
        self.archived.get(path.as_ref()).copied()
    }

    pub fn len(&self) -> usize {
        self.archived.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archived.is_empty()
    }

    /// Loads a tracker saved with [`ChangeTracker::save`]. A missing file is an
    /// empty tracker.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match File::open(path) {
            Ok(f) => serde_json::from_reader(BufReader::new(f))
                .map_err(Error::from)
                .with_msg(format!("Parse change tracker state failed: {:?}", path)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!("No change tracker state at {:?}, starting empty", path);
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the tracker as JSON, replacing `path` atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }
        tmp.persist(path).map_err(|e| e.error)?;
        tracing::debug!("Saved {} change tracker entries to {:?}", self.len(), path);
        Ok(())
    }
}
