use clap::Parser;
use inc_backup::backup::backup_config::BackupConfig;
use inc_backup::backup::engine::BackupEngine;
use inc_backup::backup::event_log::{EventLog, FileEventLog};
use inc_backup::backup::progress::LogProgress;
use inc_backup::backup::result_error::result::Result;
use inc_backup::backup::scheduler::Scheduler;
use inc_backup::backup::validate::parse_positive;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tracing::{error, info};

/// Incremental backups of a set of directories into timestamped archives
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,

    /// Run a single backup and exit
    #[arg(long)]
    once: bool,

    /// Minutes between automatic backups, overrides the config file
    #[arg(short, long)]
    interval: Option<String>,

    /// Destination quota in MB, overrides the config file
    #[arg(short, long)]
    quota: Option<String>,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => exit(0),
        Err(e) => {
            error!("{e}");
            exit(1)
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = BackupConfig::load(&args.config)?;
    let event_log: Arc<dyn EventLog> = Arc::new(FileEventLog::new(config.log_file_or_default()));
    let engine = Arc::new(BackupEngine::from_config(
        &config,
        Arc::new(LogProgress),
        event_log.clone(),
    )?);

    if args.once {
        if let Some(quota) = &args.quota {
            engine.set_quota_mb(parse_positive(quota, "Quota in MB")?);
        }
        let report = engine.run()?;
        info!("Backup written to {:?}", report.archive_path());
        return Ok(());
    }

    let interval = args
        .interval
        .unwrap_or_else(|| config.interval_minutes().to_string());
    let quota = args.quota.unwrap_or_else(|| config.quota_mb().to_string());

    let scheduler = Scheduler::new(engine, event_log);
    scheduler.toggle(interval, quota)?;
    scheduler.wait();
    error!("Loop should never break without stop");
    Ok(())
}
