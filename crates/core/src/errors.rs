//! Error types for the forksync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Worktree(#[from] WorktreeError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from invoking the `git` binary.
#[derive(Debug, Error)]
pub enum GitError {
    /// The `git` binary was not found on `$PATH`.
    #[error("git binary not found: {0}")]
    BinaryNotFound(String),

    /// A `git` command exited with a non-zero status.
    #[error("git {command} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A ref (branch, remote-tracking ref, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Output from `git` did not have the expected shape.
    #[error("unexpected git output from {command}: {detail}")]
    UnexpectedOutput { command: String, detail: String },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Worktree errors
// ---------------------------------------------------------------------------

/// Errors from the ephemeral worktree lifecycle.
#[derive(Debug, Error)]
pub enum WorktreeError {
    /// A worktree is already registered for this process.
    #[error("a worktree is already active at '{0}'")]
    AlreadyRegistered(String),

    /// The worktree directory could not be prepared.
    #[error("failed to prepare worktree at '{path}': {detail}")]
    CreateFailed { path: String, detail: String },

    /// Underlying git error.
    #[error("worktree git error: {0}")]
    GitError(#[from] GitError),
}

// ---------------------------------------------------------------------------
// Publish errors
// ---------------------------------------------------------------------------

/// Errors from building and pushing review branches.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The remote branch moved since it was fetched.
    #[error("remote branch '{remote}/{branch}' changed since it was fetched; refusing to overwrite")]
    StaleLease { remote: String, branch: String },

    /// Nothing could be published.
    #[error("no publishable files for branch '{0}'")]
    NothingToPublish(String),

    /// Underlying git error.
    #[error("publish git error: {0}")]
    GitError(#[from] GitError),

    /// Generic I/O error (reading working-tree files).
    #[error("publish I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Sync session errors
// ---------------------------------------------------------------------------

/// Errors from a sync session.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Fork and upstream share no history.
    #[error("no merge-base between '{fork}' and '{upstream}'")]
    NoMergeBase { fork: String, upstream: String },

    /// The merge failed without leaving conflicts to resolve.
    #[error("merge of '{upstream}' failed: {detail}")]
    MergeFailed { upstream: String, detail: String },

    /// Underlying git error.
    #[error("sync git error: {0}")]
    GitError(#[from] GitError),

    /// Worktree lifecycle error.
    #[error("sync worktree error: {0}")]
    WorktreeError(#[from] WorktreeError),

    /// Publish error.
    #[error("sync publish error: {0}")]
    PublishError(#[from] PublishError),

    /// Configuration error.
    #[error("sync config error: {0}")]
    ConfigError(#[from] ConfigError),
}
