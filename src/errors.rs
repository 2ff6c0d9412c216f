//! Error taxonomy for dashboard requests.
//!
//! Every variant maps to a stable machine-readable code and an HTTP status so the
//! request layer never has to guess how a failure should be presented.

use std::path::PathBuf;

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashError {
    #[error("process supervisor unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Process {0} not found")]
    ProcessNotFound(String),

    #[error("Process {name} is not known to the supervisor")]
    UnknownProcess { name: String, stderr: String },

    #[error("No working directory found for process {0}")]
    NoWorkingDirectory(String),

    #[error("Working directory {} does not exist", .0.display())]
    DirectoryMissing(PathBuf),

    #[error("{} not found in {}", .file, .dir.display())]
    ManifestMissing { file: String, dir: PathBuf },

    #[error("Invalid {} in {}: {}", .file, .dir.display(), .reason)]
    ManifestInvalid {
        file: String,
        dir: PathBuf,
        reason: String,
    },

    #[error("No {script} script found in {file} for {process}")]
    ScriptMissing {
        script: String,
        file: String,
        process: String,
    },

    #[error("{message}")]
    CommandFailed { message: String, stderr: String },

    #[error("{message}")]
    CommandTimedOut { message: String, stderr: String },

    #[error("Log file not found: {0}")]
    LogFileAbsent(String),

    #[error("Invalid action '{0}'. Use start, stop, or restart.")]
    InvalidAction(String),

    #[error("Invalid log type '{0}'. Use out or error.")]
    InvalidLogType(String),

    #[error("Invalid line count '{0}'. Use one of 50, 100, 200, 500, 1000.")]
    InvalidLineCount(String),

    #[error("Invalid process name '{0}'")]
    InvalidProcessName(String),
}

impl DashError {
    /// Stable identifier surfaced to API clients as `code`.
    pub fn code(&self) -> &'static str {
        match self {
            DashError::DirectoryUnavailable(_) => "DirectoryUnavailable",
            DashError::ProcessNotFound(_) => "ProcessNotFound",
            DashError::UnknownProcess { .. } => "UnknownProcess",
            DashError::NoWorkingDirectory(_) => "NoWorkingDirectory",
            DashError::DirectoryMissing(_) => "DirectoryMissing",
            DashError::ManifestMissing { .. } => "ManifestMissing",
            DashError::ManifestInvalid { .. } => "ManifestInvalid",
            DashError::ScriptMissing { .. } => "ScriptMissing",
            DashError::CommandFailed { .. } => "CommandFailed",
            DashError::CommandTimedOut { .. } => "CommandTimedOut",
            DashError::LogFileAbsent(_) => "LogFileAbsent",
            DashError::InvalidAction(_) => "InvalidAction",
            DashError::InvalidLogType(_) => "InvalidLogType",
            DashError::InvalidLineCount(_) => "InvalidLineCount",
            DashError::InvalidProcessName(_) => "InvalidProcessName",
        }
    }

    /// HTTP status for this failure.
    ///
    /// Command-level failures are reported with 200 and `success: false`; everything
    /// else is either a malformed request, an unmet prerequisite, or a missing resource.
    pub fn status(&self) -> StatusCode {
        match self {
            DashError::DirectoryUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DashError::ProcessNotFound(_)
            | DashError::UnknownProcess { .. }
            | DashError::LogFileAbsent(_) => StatusCode::NOT_FOUND,
            DashError::CommandFailed { .. } | DashError::CommandTimedOut { .. } => StatusCode::OK,
            DashError::NoWorkingDirectory(_)
            | DashError::DirectoryMissing(_)
            | DashError::ManifestMissing { .. }
            | DashError::ManifestInvalid { .. }
            | DashError::ScriptMissing { .. }
            | DashError::InvalidAction(_)
            | DashError::InvalidLogType(_)
            | DashError::InvalidLineCount(_)
            | DashError::InvalidProcessName(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Raw tool stderr attached to the failure, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            DashError::UnknownProcess { stderr, .. }
            | DashError::CommandFailed { stderr, .. }
            | DashError::CommandTimedOut { stderr, .. } => {
                Some(stderr.as_str()).filter(|s| !s.trim().is_empty())
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DashError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failures_are_reported_in_band() {
        let err = DashError::CommandTimedOut {
            message: "`npm install` timed out after 300s".into(),
            stderr: String::new(),
        };
        assert_eq!(err.status(), StatusCode::OK);
        assert_eq!(err.code(), "CommandTimedOut");
        assert_eq!(err.stderr(), None);
    }

    #[test]
    fn prerequisites_are_bad_requests() {
        let err = DashError::ManifestMissing {
            file: "package.json".into(),
            dir: PathBuf::from("/srv/web"),
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "package.json not found in /srv/web");
    }
}
