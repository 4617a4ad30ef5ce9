use crate::backup::result_error::WithMsg;
use itertools::Itertools;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Destination usage {usage_mb:.2} MB reached quota {quota_mb} MB")]
    CapacityExceeded { usage_mb: f64, quota_mb: u64 },
    #[error("Cannot access {path:?}: {error}")]
    FileAccess {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("File {path:?} shrank while archiving: expected {expected} bytes, read {read}")]
    FileChanged {
        path: PathBuf,
        expected: u64,
        read: u64,
    },
    #[error("Cannot finalize archive {path:?}: {error}")]
    ArchiveFinalize {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("A backup run is already in progress")]
    AlreadyRunning,
    #[error("Automatic backup is already running")]
    SchedulerAlreadyRunning,
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(|e| e.into_iter()).collect_vec())
    }
}

impl Error {
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    /// Innermost error, skipping any context added with [`WithMsg`].
    pub fn root(&self) -> &Error {
        match self {
            Error::WithMsg { error, .. } => error.root(),
            e => e,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self.root(),
            Error::Configuration(_) | Error::ValidationError(_)
        )
    }

    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self.root(), Error::CapacityExceeded { .. })
    }

    /// Errors that skip one file without failing the run.
    pub fn is_file_level(&self) -> bool {
        matches!(
            self.root(),
            Error::FileAccess { .. } | Error::FileChanged { .. }
        )
    }

    pub fn is_already_running(&self) -> bool {
        matches!(self.root(), Error::AlreadyRunning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_found(msg: &str) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotFound, msg.to_string())
    }

    #[test]
    fn test_error_from_io_error() {
        match Error::from(not_found("file not found")) {
            Error::Io(_) => (),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_with_msg() {
        let error = Error::from(not_found("file not found")).with_msg("Custom message");
        match error {
            Error::WithMsg { msg, .. } => assert_eq!(msg, "Custom message"),
            _ => panic!("Expected WithMsg error"),
        }
    }

    #[test]
    fn test_error_with_msg_display() {
        let error = Error::from(not_found("file not found")).with_msg("Operation failed");
        let error_str = error.to_string();
        assert!(error_str.contains("Operation failed"));
        assert!(error_str.contains("  file not found"));
    }

    #[test]
    fn test_error_from_vec_flattens() {
        let nested = Error::from(vec![Error::AlreadyRunning, Error::AlreadyRunning]);
        let combined = Error::from(vec![nested, Error::SchedulerAlreadyRunning]);
        match combined {
            Error::LotsOfError(v) => assert_eq!(v.len(), 3),
            _ => panic!("Expected LotsOfError"),
        }
    }

    #[test]
    #[should_panic(expected = "Should not create lots of errors when error is empty")]
    fn test_error_from_empty_vec_panics() {
        let _ = Error::from(Vec::<Error>::new());
    }

    #[test]
    fn test_file_level_errors() {
        let shrank = Error::FileChanged {
            path: "a.log".into(),
            expected: 10,
            read: 4,
        };
        assert_eq!(
            shrank.to_string(),
            "File \"a.log\" shrank while archiving: expected 10 bytes, read 4"
        );
        assert!(shrank.is_file_level());
        assert!(Error::FileAccess {
            path: "b".into(),
            error: not_found("gone"),
        }
        .is_file_level());
        assert!(!Error::AlreadyRunning.is_file_level());
    }

    #[test]
    fn test_classification_sees_through_context() {
        let err = Error::CapacityExceeded {
            usage_mb: 2.0,
            quota_mb: 1,
        }
        .with_msg("Scheduled tick");
        assert!(err.is_capacity_exceeded());
        assert!(!err.is_configuration());

        let err = Error::configuration("no sources").with_msg("Manual backup");
        assert!(err.is_configuration());
        assert!(Error::AlreadyRunning.with_msg("x").is_already_running());
    }

    #[test]
    fn test_capacity_exceeded_display() {
        let err = Error::CapacityExceeded {
            usage_mb: 300.0,
            quota_mb: 250,
        };
        assert_eq!(
            err.to_string(),
            "Destination usage 300.00 MB reached quota 250 MB"
        );
    }
}
