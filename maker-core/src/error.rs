//! Error taxonomy for the execution core.
//!
//! Every recoverable/unrecoverable condition named in the execution engine
//! specification maps to one variant here. Bounded-retry loops (Red-Flag
//! Guard, Linter Loop) never surface `MakerError` until their retry budget
//! is exhausted; everything else propagates immediately.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias used throughout the core.
pub type MakerResult<T> = Result<T, MakerError>;

/// The engine's error taxonomy (spec §7).
#[derive(Error, Debug)]
pub enum MakerError {
    /// A second session started without worktrees enabled while another
    /// session still has active workers.
    #[error("a session is already executing and worktrees are disabled")]
    ParallelNotAllowed,

    /// The Decomposer could not recover an array of steps from the model
    /// response.
    #[error("decomposition failed: {reason}")]
    Decomposition { reason: String },

    /// Worktree acquisition failed.
    #[error("worktree error for step {step_id}: {message}")]
    Worktree { step_id: String, message: String },

    /// The Linter Loop received a `SECURITY:` diagnostic.
    #[error("security diagnostic: {message}")]
    Security { message: String },

    /// Red-flag checks still fired after the retry budget was exhausted.
    #[error("red flags persisted after {attempts} attempts: {flags:?}")]
    RedFlagPersisted { attempts: u32, flags: Vec<String> },

    /// Auto-fix exhausted its retry budget and re-planning produced no
    /// rescue steps.
    #[error("lint errors unrecoverable for step {step_id}")]
    LintUnrecoverable { step_id: String },

    /// Squash-merge of a worktree branch surfaced unmerged paths.
    #[error("merge conflict merging branch {branch}")]
    MergeConflict { branch: String },

    /// A path normalized to contain a `..` segment.
    #[error("path traversal rejected: {path}")]
    PathTraversal { path: String },

    /// The language-model transport returned an error.
    #[error("model error: {0}")]
    Model(String),

    /// The tool runner returned an error.
    #[error("tool error: {0}")]
    Tool(String),

    /// A git/RCS operation failed.
    #[error("revision-control error during {operation}: {message}")]
    Rcs { operation: String, message: String },

    /// An I/O error from the filesystem mirror.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A step transitioned illegally (see the state machine in executor.rs).
    #[error("invalid step transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// `MakerConfig` failed validation (e.g. `maxParallelism < 1`).
    #[error("configuration error: {message}")]
    Config { message: String },

    /// An input failed validation (used for parse-at-boundary checks).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Referenced a step id that doesn't exist in the session.
    #[error("unknown step: {step_id}")]
    UnknownStep { step_id: String },

    /// Referenced a session id that doesn't exist in engine state.
    #[error("unknown session: {session_id}")]
    UnknownSession { session_id: String },
}

impl MakerError {
    pub fn worktree(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Worktree {
            step_id: step_id.into(),
            message: message.into(),
        }
    }

    pub fn rcs(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rcs {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn path_traversal(path: impl Into<PathBuf>) -> Self {
        Self::PathTraversal {
            path: path.into().display().to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether this error is a transient RCS failure worth retrying
    /// (lock contention, transient network blip).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rcs { message, .. } => {
                let lower = message.to_lowercase();
                lower.contains("lock")
                    || lower.contains("timeout")
                    || lower.contains("another git process")
            }
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Machine-readable error code, matching spec §7's `ERR_*` names.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParallelNotAllowed => "ERR_PARALLEL_NOT_ALLOWED",
            Self::Decomposition { .. } => "ERR_DECOMPOSITION",
            Self::Worktree { .. } => "ERR_WORKTREE",
            Self::Security { .. } => "ERR_SECURITY",
            Self::RedFlagPersisted { .. } => "ERR_REDFLAG_PERSISTED",
            Self::LintUnrecoverable { .. } => "ERR_LINT_UNRECOVERABLE",
            Self::MergeConflict { .. } => "ERR_MERGE_CONFLICT",
            Self::PathTraversal { .. } => "ERR_PATH_TRAVERSAL",
            Self::Model(_) => "ERR_MODEL",
            Self::Tool(_) => "ERR_TOOL",
            Self::Rcs { .. } => "ERR_RCS",
            Self::Io(_) => "ERR_IO",
            Self::Json(_) => "ERR_JSON",
            Self::InvalidStateTransition { .. } => "ERR_INVALID_TRANSITION",
            Self::Config { .. } => "ERR_CONFIG",
            Self::Validation { .. } => "ERR_VALIDATION",
            Self::UnknownStep { .. } => "ERR_UNKNOWN_STEP",
            Self::UnknownSession { .. } => "ERR_UNKNOWN_SESSION",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_rcs_lock_error() {
        let err = MakerError::rcs("commit", "fatal: could not lock index");
        assert!(err.is_retryable());
    }

    #[test]
    fn non_retryable_validation_error() {
        let err = MakerError::validation("bad input");
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_codes_match_taxonomy() {
        assert_eq!(MakerError::ParallelNotAllowed.code(), "ERR_PARALLEL_NOT_ALLOWED");
        assert_eq!(
            MakerError::Security {
                message: "x".into()
            }
            .code(),
            "ERR_SECURITY"
        );
    }
}
