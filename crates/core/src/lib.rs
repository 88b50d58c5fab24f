//! ForkSync core library.
//!
//! Keeps a long-lived fork in sync with its upstream: classifies every path
//! both sides touched since their merge-base, previews or applies the merge
//! while honouring ignored and pinned overrides, and publishes review
//! branches without touching the working copy.

pub mod classify;
pub mod config;
pub mod errors;
pub mod git;
pub mod models;
pub mod overrides;
pub mod publish;
pub mod resolve;
pub mod session;
pub mod worktree;

// Re-exports for convenience.
pub use config::ForkSyncConfig;
pub use errors::CoreError;
pub use models::{FileRecord, FileStatus, MergeResult};
pub use overrides::OverridePolicy;
pub use publish::{BranchPublisher, PublishReport};
pub use session::{SessionMode, SyncSession};
