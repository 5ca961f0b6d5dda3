use serde::{Deserialize, Serialize};

use crate::protocol::{Response, ResponseStatus};

/// Fatal problems. These end the script and are never turned into a pass
/// by `%shouldfail`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("{0}")]
    Transport(String),

    /// The agent answered ERROR
    #[error("{0}")]
    Agent(String),

    #[error("command '{command}' has unresolved variable '{name}'")]
    UnresolvedVariable { name: String, command: String },

    #[error("script '{0}' not found")]
    ScriptNotFound(String),

    #[error("script '{0}' is empty")]
    EmptyScript(String),

    #[error("datafile '{0}' not found")]
    DataFileNotFound(String),

    #[error("{0}")]
    InvalidCommand(String),

    #[error("playback aborted")]
    Aborted,

    /// Error that ended a sub-script
    #[error("{0}")]
    Script(String),
}

impl ScriptError {
    /// Errors that stop the run whatever `%abort` says
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScriptError::Transport(_) | ScriptError::UnresolvedVariable { .. } | ScriptError::Aborted
        )
    }
}

/// Recoverable, assertion-like failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptFailure {
    #[error("{0}")]
    ComponentNotFound(String),

    #[error("{0}")]
    VerifyMismatch(String),

    /// The agent answered FAILURE for some other reason
    #[error("{0}")]
    Agent(String),

    /// Failure that ended a sub-script
    #[error("{0}")]
    Script(String),
}

/// Agents report a missing component with this message prefix
pub const NOT_FOUND_PREFIX: &str = "Unable to find";

impl ScriptFailure {
    /// Classify an agent FAILURE message
    pub fn from_agent(message: &str) -> Self {
        if message.starts_with(NOT_FOUND_PREFIX) {
            ScriptFailure::ComponentNotFound(message.to_string())
        } else {
            ScriptFailure::Agent(message.to_string())
        }
    }
}

/// Overall status of a step or a script run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlaybackStatus {
    Ok,
    Failure,
    Error,
}

impl From<ResponseStatus> for PlaybackStatus {
    fn from(status: ResponseStatus) -> Self {
        match status {
            ResponseStatus::Ok => PlaybackStatus::Ok,
            ResponseStatus::Failure => PlaybackStatus::Failure,
            ResponseStatus::Error => PlaybackStatus::Error,
        }
    }
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackStatus::Ok => f.write_str("OK"),
            PlaybackStatus::Failure => f.write_str("FAILURE"),
            PlaybackStatus::Error => f.write_str("ERROR"),
        }
    }
}

/// Reconciled result of one step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Passed(Option<String>),
    Failed(ScriptFailure),
    Errored(ScriptError),
    Skipped(String),
}

impl StepOutcome {
    pub fn ok() -> Self {
        StepOutcome::Passed(None)
    }

    pub fn passed(message: impl Into<String>) -> Self {
        StepOutcome::Passed(Some(message.into()))
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        StepOutcome::Errored(ScriptError::InvalidCommand(message.into()))
    }

    /// Outcome of an agent reply, before `%shouldfail` is applied
    pub fn from_response(response: &Response) -> Self {
        match response.status {
            ResponseStatus::Ok => StepOutcome::Passed(response.message.clone()),
            ResponseStatus::Failure => {
                StepOutcome::Failed(ScriptFailure::from_agent(response.message_or_empty()))
            }
            ResponseStatus::Error => {
                StepOutcome::Errored(ScriptError::Agent(response.message_or_empty().to_string()))
            }
        }
    }

    /// Outcome of a finished sub-script, by its overall status
    pub fn from_status(status: PlaybackStatus, message: Option<String>) -> Self {
        match status {
            PlaybackStatus::Ok => StepOutcome::Passed(message),
            PlaybackStatus::Failure => {
                StepOutcome::Failed(ScriptFailure::Script(message.unwrap_or_default()))
            }
            PlaybackStatus::Error => {
                StepOutcome::Errored(ScriptError::Script(message.unwrap_or_default()))
            }
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        match self {
            StepOutcome::Passed(_) | StepOutcome::Skipped(_) => PlaybackStatus::Ok,
            StepOutcome::Failed(_) => PlaybackStatus::Failure,
            StepOutcome::Errored(_) => PlaybackStatus::Error,
        }
    }

    pub fn message(&self) -> Option<String> {
        match self {
            StepOutcome::Passed(m) => m.clone(),
            StepOutcome::Failed(f) => Some(f.to_string()),
            StepOutcome::Errored(e) => Some(e.to_string()),
            StepOutcome::Skipped(reason) => Some(reason.clone()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StepOutcome::Errored(_))
    }

    /// Apply `%shouldfail=true`: a failure becomes a pass and a pass becomes a
    /// failure. Errors and skips are left alone.
    pub fn reconcile_should_fail(self) -> Self {
        match self {
            StepOutcome::Passed(_) => StepOutcome::Failed(ScriptFailure::Agent(
                "expected failure, but was OK".to_string(),
            )),
            StepOutcome::Failed(f) => StepOutcome::passed(format!("expected failure : {}", f)),
            other => other,
        }
    }

    /// Listener-facing reply for this outcome
    pub fn to_response(&self) -> Response {
        match self {
            StepOutcome::Passed(m) => Response::ok(m.clone()),
            StepOutcome::Skipped(reason) => Response::ok(reason.clone()),
            StepOutcome::Failed(f) => Response::failure(f.to_string()),
            StepOutcome::Errored(e) => Response::error(e.to_string()),
        }
    }
}
