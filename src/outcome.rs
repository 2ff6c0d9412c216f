//! Command outcomes and their normalisation into API responses.
//!
//! `ActionOutcome` is what the executor hands back for every invocation. The
//! request layer never inspects it directly; it goes through [`ActionResponse`],
//! which decides the `success`/`error`/`code` fields and the HTTP status.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use axum::http::StatusCode;
use regex::Regex;
use serde::Serialize;

use crate::deploy::DeployAction;
use crate::errors::DashError;
use crate::supervisor::LifecycleAction;

/// Why a command did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The program could not be started (or waited on).
    Spawn,
    /// The program ran and exited unsuccessfully. `None` means it was killed by a signal.
    Exit { code: Option<i32> },
    /// The program exceeded its budget and its process tree was killed.
    TimedOut { budget: Duration },
}

/// Result of one external command invocation.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    pub error_message: Option<String>,
    pub failure: Option<Failure>,
    pub working_directory: Option<PathBuf>,
}

impl ActionOutcome {
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            succeeded: true,
            stdout,
            stderr,
            error_message: None,
            failure: None,
            working_directory: None,
        }
    }

    pub fn failed(failure: Failure, message: String, stdout: String, stderr: String) -> Self {
        Self {
            succeeded: false,
            stdout,
            stderr,
            error_message: Some(message),
            failure: Some(failure),
            working_directory: None,
        }
    }

    /// Records the directory the command ran in.
    pub fn in_directory(mut self, dir: PathBuf) -> Self {
        self.working_directory = Some(dir);
        self
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.failure, Some(Failure::TimedOut { .. }))
    }
}

/// Every action the dashboard can perform against a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Lifecycle(LifecycleAction),
    Deploy(DeployAction),
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Lifecycle(action) => action.as_str(),
            ActionKind::Deploy(action) => action.as_str(),
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ActionKind::Lifecycle(action) => action.as_str(),
            ActionKind::Deploy(action) => action.title(),
        }
    }
}

/// JSON body returned by every action endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub success: bool,
    pub process_name: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ActionResponse {
    /// Normalises a finished command into a response.
    pub fn from_outcome(
        process_name: &str,
        action: ActionKind,
        outcome: ActionOutcome,
    ) -> (StatusCode, Self) {
        let working_directory = outcome
            .working_directory
            .as_ref()
            .map(|dir| dir.display().to_string());

        if let Some(err) = classify_failure(process_name, action, &outcome) {
            // stderr is already carried by the error itself.
            let response = Self {
                working_directory,
                output: non_empty(outcome.stdout),
                details: outcome.error_message,
                ..Self::failure(process_name, action, &err)
            };
            return (err.status(), response);
        }

        let output = if outcome.stdout.trim().is_empty() {
            format!("{} completed successfully", action.title())
        } else {
            outcome.stdout
        };
        let response = Self {
            success: true,
            process_name: process_name.to_string(),
            action: action.as_str().to_string(),
            working_directory,
            output: Some(output),
            stderr: non_empty(outcome.stderr),
            message: Some(success_message(process_name, action)),
            error: None,
            code: None,
            details: None,
        };
        (StatusCode::OK, response)
    }

    /// Builds a response for a request that never reached the executor.
    pub fn from_error(process_name: &str, action: ActionKind, err: &DashError) -> (StatusCode, Self) {
        (err.status(), Self::failure(process_name, action, err))
    }

    fn failure(process_name: &str, action: ActionKind, err: &DashError) -> Self {
        Self {
            success: false,
            process_name: process_name.to_string(),
            action: action.as_str().to_string(),
            working_directory: None,
            output: None,
            stderr: err.stderr().map(str::to_string),
            message: None,
            error: Some(err.to_string()),
            code: Some(err.code().to_string()),
            details: None,
        }
    }
}

/// Maps an unsuccessful outcome onto the error taxonomy. Returns `None` on success.
pub fn classify_failure(
    process_name: &str,
    action: ActionKind,
    outcome: &ActionOutcome,
) -> Option<DashError> {
    if outcome.succeeded {
        return None;
    }
    let stderr = outcome.stderr.clone();
    if outcome.timed_out() {
        return Some(DashError::CommandTimedOut {
            message: format!("{} timed out for {}", action.title(), process_name),
            stderr,
        });
    }
    if let ActionKind::Lifecycle(_) = action {
        if outcome.failure != Some(Failure::Spawn)
            && (names_unknown_process(&outcome.stderr) || names_unknown_process(&outcome.stdout))
        {
            return Some(DashError::UnknownProcess {
                name: process_name.to_string(),
                stderr,
            });
        }
    }
    let message = match action {
        ActionKind::Lifecycle(action) => {
            format!("Failed to {} process {}", action.as_str(), process_name)
        }
        ActionKind::Deploy(action) => format!("{} failed for {}", action.title(), process_name),
    };
    Some(DashError::CommandFailed { message, stderr })
}

/// Heuristic: does this supervisor output say the target process does not exist?
///
/// PM2 exits 1 for every failure, so the only signal is its wording. Known forms:
/// `[PM2][ERROR] Process or Namespace api not found` (5.x),
/// `[PM2][ERROR] Process api not found` (older releases), and
/// `[PM2][ERROR] Script not found: /path/api` (`start` on a name PM2 does not know,
/// which it then tries to treat as a script path). Future releases may reword these.
pub fn names_unknown_process(text: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(process(?: or namespace)? .+? not found|script not found)")
            .expect("unknown-process pattern is valid")
    });
    pattern.is_match(text)
}

fn success_message(process_name: &str, action: ActionKind) -> String {
    match action {
        ActionKind::Lifecycle(action) => {
            format!("Successfully {} process {}", action.past_tense(), process_name)
        }
        ActionKind::Deploy(action) => format!("{} completed for {}", action.title(), process_name),
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
