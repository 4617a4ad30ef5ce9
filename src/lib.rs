//! # inc-backup
//!
//! Scheduled, incremental, size-bounded backups of source directories into
//! timestamped compressed archives.
//!
//! ## Features
//!
//! - **Incremental**: a file is archived again only when its modification time moved forward
//! - **Quota guard**: no new archive once the destination holds the configured amount
//! - **Automatic mode**: a run every interval, stoppable between runs
//! - **Tar + gzip archives** readable by standard tools
//!
//! ## Quick Start
//!
//! ```no_run
//! use inc_backup::backup::backup_config::BackupConfig;
//! use inc_backup::backup::engine::BackupEngine;
//! use inc_backup::backup::event_log::FileEventLog;
//! use inc_backup::backup::progress::NoProgress;
//! use inc_backup::backup::scheduler::Scheduler;
//! use std::sync::Arc;
//!
//! let config = BackupConfig::load("config.yml")?;
//! let event_log = Arc::new(FileEventLog::new(config.log_file_or_default()));
//! let engine = BackupEngine::from_config(&config, Arc::new(NoProgress), event_log.clone())?;
//!
//! let scheduler = Scheduler::new(Arc::new(engine), event_log);
//! scheduler.toggle("60", "500")?;
//! scheduler.wait();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
