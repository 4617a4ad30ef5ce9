pub mod archive;
pub mod backup_config;
pub mod change_tracker;
pub mod compress;
pub mod engine;
pub mod event_log;
pub mod file_ext;
pub mod finish;
pub mod progress;
pub mod result_error;
pub mod scheduler;
pub mod space_guard;
pub mod validate;
pub mod walk;
