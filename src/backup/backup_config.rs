use crate::backup::compress::CompressorConfig;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::validate::{validate_dir_exist_or_created, validate_source_dirs};

use bon::Builder;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use validator::Validate;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub static DEFAULT_INTERVAL_MINUTES: u64 = 60;
pub static DEFAULT_QUOTA_MB: u64 = 500;
pub static DEFAULT_LOG_FILE: &str = "log.txt";

/// Everything needed to run backups, usually read from a YAML file.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters, CopyGetters)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// Directories to back up, in order.
    #[validate(length(min = 1), custom(function = validate_source_dirs))]
    #[builder(into)]
    #[getset(get = "pub")]
    sources: Vec<PathBuf>,
    /// Directory receiving the archives. Created when missing.
    #[validate(custom(function = validate_dir_exist_or_created))]
    #[builder(into)]
    #[getset(get = "pub")]
    destination: PathBuf,
    #[serde(default = "default_interval_minutes")]
    #[validate(range(min = 1))]
    #[builder(default = DEFAULT_INTERVAL_MINUTES)]
    #[getset(get_copy = "pub")]
    interval_minutes: u64,
    /// No new archive is started once the destination holds this much.
    #[serde(default = "default_quota_mb")]
    #[validate(range(min = 1))]
    #[builder(default = DEFAULT_QUOTA_MB)]
    #[getset(get_copy = "pub")]
    quota_mb: u64,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    follow_symlinks: bool,
    #[serde(default)]
    #[validate(nested)]
    #[builder(default)]
    #[getset(get = "pub")]
    compressor: CompressorConfig,
    /// Keeps change tracking across restarts. Without it every new process
    /// starts with a full backup.
    #[builder(into)]
    #[getset(get = "pub")]
    state_file: Option<PathBuf>,
    #[builder(into)]
    #[getset(get = "pub")]
    log_file: Option<PathBuf>,
}

fn default_interval_minutes() -> u64 {
    DEFAULT_INTERVAL_MINUTES
}

fn default_quota_mb() -> u64 {
    DEFAULT_QUOTA_MB
}

impl BackupConfig {
    /// Reads and validates a YAML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config: BackupConfig = File::open(path)
            .map_err(Error::from)
            .and_then(|f| {
                serde_yml::from_reader(f)
                    .map_err(Error::from)
                    .with_msg(format!("Parse YAML config failed: {:?}", path))
            })?;
        config
            .validate()
            .map_err(Error::from)
            .with_msg(format!("Config validation failed: {:?}", path))?;
        Ok(config)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    pub fn log_file_or_default(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE))
    }
}
