use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("harness not initialized: run 'ftharness initialize-harness'")]
    NotInitialized,

    #[error("not a git repository: {0}")]
    NotGitRepo(PathBuf),

    #[error("feat not found: {0}")]
    FeatNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("invalid slug '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidSlug(String),

    #[error("invalid feat id: {0}")]
    InvalidFeatId(String),

    #[error("invalid task id: {0}")]
    InvalidTaskId(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid commit message: {0}")]
    InvalidCommit(String),

    #[error("commit trailer mismatch: expected {expected}, found {found}")]
    TrailerMismatch { expected: String, found: String },

    #[error("git {command} failed (exit {code}): {stderr}")]
    Git {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("gate failed: {0}")]
    GateFailed(String),

    #[error("reference readiness check failed: {0}")]
    ReferenceNotReady(String),

    #[error("corrupt state file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("state file not found: {0}")]
    NotFound(PathBuf),

    #[error("stale worktree registration: {0}")]
    StaleWorktree(String),

    #[error("harness validation failed: {0}")]
    ValidationFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Process exit code for this error kind.
    ///
    /// 3 = invariant/precondition violation, 4 = external (git/gate)
    /// failure, 5 = IO or SSOT corruption.
    pub fn exit_code(&self) -> i32 {
        match self {
            HarnessError::NotInitialized
            | HarnessError::NotGitRepo(_)
            | HarnessError::FeatNotFound(_)
            | HarnessError::TaskNotFound(_)
            | HarnessError::InvalidSlug(_)
            | HarnessError::InvalidFeatId(_)
            | HarnessError::InvalidTaskId(_)
            | HarnessError::InvalidTransition { .. }
            | HarnessError::InvalidCommit(_)
            | HarnessError::TrailerMismatch { .. }
            | HarnessError::GateFailed(_)
            | HarnessError::ReferenceNotReady(_)
            | HarnessError::NotFound(_)
            | HarnessError::StaleWorktree(_)
            | HarnessError::ValidationFailed(_) => 3,
            HarnessError::Git { .. } => 4,
            HarnessError::Corrupt { .. } | HarnessError::Io(_) => 5,
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
