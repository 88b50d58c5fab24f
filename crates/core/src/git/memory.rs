//! In-memory [`RepoAccessor`] for exercising the engines without `git`.
//!
//! Trees are registered under revision names. The working copy is a single
//! listing that `restore_path` and `remove_path` edit in place, and conflicts
//! are a set of paths the test marks by hand to stand in for a real merge.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use super::{RepoAccessor, TreeEntry, TreeListing};
use crate::errors::GitError;

#[derive(Debug, Default)]
pub struct MemoryRepo {
    trees: BTreeMap<String, TreeListing>,
    working: Mutex<TreeListing>,
    conflicts: Mutex<BTreeSet<String>>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tree of `(path, oid)` pairs under `rev`.
    pub fn with_tree(mut self, rev: &str, files: &[(&str, &str)]) -> Self {
        self.trees.insert(rev.to_string(), listing(files));
        self
    }

    /// Replace the working copy with the tree registered under `rev`.
    pub fn with_working_copy_of(self, rev: &str) -> Self {
        let tree = self.trees.get(rev).cloned().unwrap_or_default();
        *lock(&self.working) = tree;
        self
    }

    /// Set a working-copy entry, as a real merge would.
    pub fn with_working_file(self, path: &str, oid: &str) -> Self {
        lock(&self.working).insert(path.to_string(), TreeEntry::blob(oid));
        self
    }

    /// Mark `path` as left unresolved by the merge.
    pub fn with_conflict(self, path: &str) -> Self {
        lock(&self.conflicts).insert(path.to_string());
        self
    }

    /// Snapshot of the working copy.
    pub fn working_copy(&self) -> TreeListing {
        lock(&self.working).clone()
    }

    /// Content id of `path` in the working copy.
    pub fn working_oid(&self, path: &str) -> Option<String> {
        lock(&self.working).get(path).map(|e| e.oid.clone())
    }

    fn tree(&self, rev: &str) -> Result<&TreeListing, GitError> {
        self.trees
            .get(rev)
            .ok_or_else(|| GitError::RefNotFound(rev.to_string()))
    }
}

impl RepoAccessor for MemoryRepo {
    async fn list_tree(&self, rev: &str) -> Result<TreeListing, GitError> {
        self.tree(rev).cloned()
    }

    async fn changed_paths(&self, from: &str, to: &str) -> Result<BTreeSet<String>, GitError> {
        let from = self.tree(from)?;
        let to = self.tree(to)?;
        let paths = from
            .keys()
            .chain(to.keys())
            .filter(|path| from.get(*path) != to.get(*path))
            .cloned()
            .collect();
        Ok(paths)
    }

    async fn conflicted_paths(&self) -> Result<BTreeSet<String>, GitError> {
        Ok(lock(&self.conflicts).clone())
    }

    async fn restore_path(&self, rev: &str, path: &str) -> Result<(), GitError> {
        let entry = self
            .tree(rev)?
            .get(path)
            .cloned()
            .ok_or_else(|| GitError::CommandFailed {
                command: "checkout".into(),
                exit_code: 1,
                stderr: format!("pathspec '{path}' did not match any file(s) known to git"),
            })?;
        lock(&self.working).insert(path.to_string(), entry);
        lock(&self.conflicts).remove(path);
        Ok(())
    }

    async fn remove_path(&self, path: &str) -> Result<(), GitError> {
        lock(&self.working).remove(path);
        lock(&self.conflicts).remove(path);
        Ok(())
    }
}

fn listing(files: &[(&str, &str)]) -> TreeListing {
    files
        .iter()
        .map(|(path, oid)| (path.to_string(), TreeEntry::blob(*oid)))
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
