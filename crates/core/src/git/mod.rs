//! Repository access for forksync.
//!
//! The classification and resolution engines only see the narrow
//! [`RepoAccessor`] trait. [`GitCli`] implements it by running the `git`
//! binary; [`MemoryRepo`] implements it over in-memory trees for tests.

pub mod client;
pub mod memory;

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::GitError;

pub use client::{GitCli, MergeOutcome, PushOutcome, TempIndex};
pub use memory::MemoryRepo;

/// One blob (or gitlink) in a tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Octal file mode as printed by git, e.g. `100644`.
    pub mode: String,
    /// Object id of the content.
    pub oid: String,
}

impl TreeEntry {
    pub fn new(mode: impl Into<String>, oid: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            oid: oid.into(),
        }
    }

    /// A regular, non-executable file.
    pub fn blob(oid: impl Into<String>) -> Self {
        Self::new("100644", oid)
    }
}

/// Full recursive listing of a tree: path -> entry.
pub type TreeListing = BTreeMap<String, TreeEntry>;

/// The operations the engines need from a repository.
///
/// Reads take explicit revisions. Working-copy operations apply to whatever
/// checkout the accessor is bound to.
#[allow(async_fn_in_trait)]
pub trait RepoAccessor {
    /// Every file at `rev`, recursively.
    async fn list_tree(&self, rev: &str) -> Result<TreeListing, GitError>;

    /// Paths whose content differs between `from` and `to`.
    async fn changed_paths(&self, from: &str, to: &str) -> Result<BTreeSet<String>, GitError>;

    /// Paths the in-progress merge left unresolved.
    async fn conflicted_paths(&self) -> Result<BTreeSet<String>, GitError>;

    /// Replace the working copy and index entry for `path` with its version
    /// at `rev`, clearing any conflict on it.
    async fn restore_path(&self, rev: &str, path: &str) -> Result<(), GitError>;

    /// Remove `path` from the working copy and index. A no-op when absent.
    async fn remove_path(&self, path: &str) -> Result<(), GitError>;
}
