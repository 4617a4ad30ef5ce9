use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;

use walkdir::WalkDir;

use std::path::Path;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Pre-run check of how much the destination already holds.
///
/// The check is advisory: it does not bound the size of the archive written
/// by the run it admits.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpaceGuard;

impl SpaceGuard {
    /// Sum of the sizes of all regular files below `destination`.
    pub fn current_usage_bytes<P: AsRef<Path>>(&self, destination: P) -> Result<u64> {
        let destination = destination.as_ref();
        if !destination.is_dir() {
            return Err(Error::configuration(format!(
                "Destination {:?} is not a directory",
                destination
            )));
        }

        let mut total = 0u64;
        for res in WalkDir::new(destination) {
            let de = match res {
                Ok(de) => de,
                Err(e) => {
                    tracing::warn!("Not counting unreadable destination entry: {e}");
                    continue;
                }
            };
            if !de.file_type().is_file() {
                continue;
            }
            match de.metadata() {
                Ok(md) => total = total.saturating_add(md.len()),
                Err(e) => tracing::warn!("Not counting {:?}: {e}", de.path()),
            }
        }

        Ok(total)
    }

    pub fn current_usage_mb<P: AsRef<Path>>(&self, destination: P) -> Result<f64> {
        self.current_usage_bytes(destination)
            .map(|bytes| bytes as f64 / BYTES_PER_MB)
    }

    /// True iff current usage is strictly below `quota_mb`.
    pub fn is_within_quota<P: AsRef<Path>>(&self, destination: P, quota_mb: u64) -> Result<bool> {
        self.current_usage_mb(destination)
            .map(|usage_mb| usage_mb < quota_mb as f64)
    }

    /// Returns the current usage in MB, or [`Error::CapacityExceeded`] once it
    /// reaches `quota_mb`.
    pub fn check<P: AsRef<Path>>(&self, destination: P, quota_mb: u64) -> Result<f64> {
        let usage_mb = self.current_usage_mb(destination)?;
        if usage_mb < quota_mb as f64 {
            Ok(usage_mb)
        } else {
            Err(Error::CapacityExceeded { usage_mb, quota_mb })
        }
    }
}
