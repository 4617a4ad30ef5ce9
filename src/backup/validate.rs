//! Validation functions for configuration values.
//!
//! Directory checks plug into `validator` derives; the string parsers back
//! the automatic-mode inputs given on the command line or by a UI.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;

use validator::ValidationError;

use std::path::{Path, PathBuf};

pub fn validate_dir_exist<P: AsRef<Path>>(dir: P) -> std::result::Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} not found", dir).into()));
    }

    Ok(())
}

pub fn validate_dir_exist_or_created<P: AsRef<Path>>(
    dir: P,
) -> std::result::Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return std::fs::create_dir_all(dir).map_err(|e| {
            ValidationError::new("InvalidDirectory").with_message(
                format!("cannot create or access destination path {:?}: {}", dir, e).into(),
            )
        });
    }

    Ok(())
}

pub fn validate_source_dirs(dirs: &[PathBuf]) -> std::result::Result<(), ValidationError> {
    dirs.iter().try_for_each(validate_dir_exist)
}

/// Parses a strictly positive whole number such as an interval in minutes or
/// a quota in MB.
pub fn parse_positive<S: AsRef<str>>(value: S, what: &str) -> Result<u64> {
    let value = value.as_ref().trim();
    match value.parse::<u64>() {
        Ok(0) => Err(Error::configuration(format!("{what} must be positive, got 0"))),
        Ok(n) => Ok(n),
        Err(_) => Err(Error::configuration(format!(
            "{what} must be a positive whole number, got {value:?}"
        ))),
    }
}
