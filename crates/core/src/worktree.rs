//! Ephemeral worktrees for non-destructive previews.
//!
//! A [`Worktree`] is a detached checkout of the fork created outside the
//! repository. At most one is registered per [`IsolationManager`]; the
//! registration is shared with an [`InterruptHandle`] so a signal handler can
//! abort the merge inside it and remove it.
//!
//! Lifecycle: `NoWorktree -> Created -> MergeAttempted -> Analyzed -> Cleaned`.
//! Cleanup happens in [`Worktree::release`] on the normal path and in `Drop`
//! when the handle is dropped while still registered (error, panic, cancelled
//! future).

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::errors::WorktreeError;
use crate::git::GitCli;

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Where a preview worktree is in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeState {
    NoWorktree,
    Created,
    MergeAttempted,
    Analyzed,
    Cleaned,
}

impl std::fmt::Display for WorktreeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoWorktree => write!(f, "no_worktree"),
            Self::Created => write!(f, "created"),
            Self::MergeAttempted => write!(f, "merge_attempted"),
            Self::Analyzed => write!(f, "analyzed"),
            Self::Cleaned => write!(f, "cleaned"),
        }
    }
}

// ---------------------------------------------------------------------------
// Registration slot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Registration {
    repo_root: PathBuf,
    path: PathBuf,
}

type Slot = Arc<Mutex<Option<Registration>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<Registration>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Creates and tracks the single preview worktree for one fork.
#[derive(Debug)]
pub struct IsolationManager {
    repo: GitCli,
    worktree_root: PathBuf,
    slot: Slot,
}

impl IsolationManager {
    /// `worktree_root` is the parent directory for worktrees; it must be
    /// outside the repository.
    pub fn new(repo: GitCli, worktree_root: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            worktree_root: worktree_root.into(),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// `<user cache dir>/forksync/worktrees`, or the system temp dir.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("forksync")
            .join("worktrees")
    }

    /// Handle for signal handlers.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            slot: self.slot.clone(),
        }
    }

    /// Path of the registered worktree, if any.
    pub fn active_path(&self) -> Option<PathBuf> {
        lock(&self.slot).as_ref().map(|r| r.path.clone())
    }

    /// Deterministic worktree location for a repository root.
    pub fn worktree_path(&self, repo_root: &Path) -> PathBuf {
        let digest = Sha256::digest(repo_root.to_string_lossy().as_bytes());
        let name = repo_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "fork".into());
        self.worktree_root
            .join(format!("{name}-{}", &hex::encode(digest)[..16]))
    }

    /// Create a detached worktree of `rev`, removing any leftover from a
    /// previous run first.
    #[instrument(skip(self))]
    pub async fn acquire(&self, rev: &str) -> Result<Worktree, WorktreeError> {
        if let Some(active) = lock(&self.slot).as_ref() {
            return Err(WorktreeError::AlreadyRegistered(
                active.path.display().to_string(),
            ));
        }

        if !self.worktree_root.is_absolute() {
            return Err(WorktreeError::CreateFailed {
                path: self.worktree_root.display().to_string(),
                detail: "worktree root must be an absolute path".into(),
            });
        }

        let repo_root = self.repo.toplevel().await?;
        let path = self.worktree_path(&repo_root);
        let canonical_root = tokio::fs::canonicalize(&self.worktree_root).await.ok();
        let inside = path.starts_with(&repo_root)
            || canonical_root.is_some_and(|root| root.starts_with(&repo_root));
        if inside {
            return Err(WorktreeError::CreateFailed {
                path: path.display().to_string(),
                detail: "worktree root must be outside the repository".into(),
            });
        }

        if path.exists() {
            warn!(path = %path.display(), "removing leftover worktree from a previous run");
        }
        self.repo.worktree_remove(&path).await?;

        tokio::fs::create_dir_all(&self.worktree_root)
            .await
            .map_err(|e| WorktreeError::CreateFailed {
                path: self.worktree_root.display().to_string(),
                detail: e.to_string(),
            })?;
        self.repo.worktree_add_detached(&path, rev).await?;

        {
            let mut slot = lock(&self.slot);
            if let Some(active) = slot.as_ref() {
                return Err(WorktreeError::AlreadyRegistered(
                    active.path.display().to_string(),
                ));
            }
            *slot = Some(Registration {
                repo_root: repo_root.clone(),
                path: path.clone(),
            });
        }

        info!(path = %path.display(), "worktree registered");
        Ok(Worktree {
            git: GitCli::new(&path),
            repo: self.repo.clone(),
            path,
            slot: self.slot.clone(),
            state: WorktreeState::Created,
        })
    }
}

// ---------------------------------------------------------------------------
// Worktree handle
// ---------------------------------------------------------------------------

/// A registered preview worktree. Removed on release or drop.
#[derive(Debug)]
pub struct Worktree {
    git: GitCli,
    repo: GitCli,
    path: PathBuf,
    slot: Slot,
    state: WorktreeState,
}

impl Worktree {
    /// Git client bound to the worktree's checkout.
    pub fn git(&self) -> &GitCli {
        &self.git
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> WorktreeState {
        self.state
    }

    /// Record a lifecycle step.
    pub fn advance(&mut self, next: WorktreeState) {
        debug_assert!(next > self.state, "worktree state must move forward");
        debug!(from = %self.state, to = %next, "worktree state transition");
        self.state = next;
    }

    /// Abort any merge, remove the worktree, and unregister it.
    ///
    /// Once unregistered, dropping the handle does nothing.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn release(self) -> Result<(), WorktreeError> {
        let abort = if self.path.exists() {
            self.git.merge_abort().await
        } else {
            Ok(())
        };
        let removed = self.repo.worktree_remove(&self.path).await;
        self.unregister();
        debug!(from = %self.state, to = %WorktreeState::Cleaned, "worktree state transition");
        info!("worktree cleaned up");
        abort?;
        removed?;
        Ok(())
    }

    fn unregister(&self) {
        let mut slot = lock(&self.slot);
        if slot.as_ref().is_some_and(|r| r.path == self.path) {
            *slot = None;
        }
    }
}

impl Drop for Worktree {
    fn drop(&mut self) {
        let registered = lock(&self.slot).clone();
        if let Some(registration) = registered.filter(|r| r.path == self.path) {
            warn!(path = %self.path.display(), state = %self.state, "worktree dropped without release; cleaning up");
            remove_blocking(&registration);
        }
        self.unregister();
    }
}

// ---------------------------------------------------------------------------
// Interrupt handle
// ---------------------------------------------------------------------------

/// Cleans up the registered worktree from a signal handler.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    slot: Slot,
}

impl InterruptHandle {
    /// Abort the merge in the registered worktree and remove it.
    ///
    /// Returns `false` if nothing was registered.
    pub async fn abort_and_remove(&self) -> Result<bool, WorktreeError> {
        let Some(registration) = lock(&self.slot).take() else {
            return Ok(false);
        };
        info!(path = %registration.path.display(), "interrupted; removing worktree");
        GitCli::new(&registration.path).merge_abort().await.ok();
        GitCli::new(&registration.repo_root)
            .worktree_remove(&registration.path)
            .await?;
        Ok(true)
    }
}

/// Synchronous cleanup for `Drop`, where awaiting is not possible.
fn remove_blocking(registration: &Registration) {
    let git = |dir: &Path, args: &[&str]| {
        Command::new("git")
            .current_dir(dir)
            .args(args)
            .env_remove("GIT_INDEX_FILE")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
    };
    let path_str = registration.path.to_string_lossy().to_string();

    if registration.path.exists() {
        let _ = git(&registration.path, &["merge", "--abort"]);
    }
    let _ = git(
        &registration.repo_root,
        &["worktree", "remove", "--force", &path_str],
    );
    if registration.path.exists() {
        if let Err(e) = std::fs::remove_dir_all(&registration.path) {
            warn!(path = %path_str, error = %e, "failed to remove worktree directory");
        }
    }
    let _ = git(&registration.repo_root, &["worktree", "prune"]);
}
