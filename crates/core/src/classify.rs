//! Per-file status classification.
//!
//! Compares three trees (fork, upstream, merge-base) and assigns every path
//! touched by either side exactly one [`FileStatus`]. The decision for a path
//! depends only on its [`ClassifyInputs`]; nothing carries over between
//! paths.
//!
//! # Precedence
//!
//! 1. ignored
//! 2. existence (missing on one side)
//! 3. hash equality between fork and upstream
//! 4. which side changed relative to the merge-base

use std::collections::BTreeSet;

use tracing::{debug, info, instrument};

use crate::errors::GitError;
use crate::git::{RepoAccessor, TreeListing};
use crate::models::{FileRecord, FileStatus};
use crate::overrides::OverridePolicy;

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Everything the status of a single path depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyInputs<'a> {
    pub exists_in_fork: bool,
    pub exists_in_upstream: bool,
    pub fork_hash: Option<&'a str>,
    pub upstream_hash: Option<&'a str>,
    pub base_hash: Option<&'a str>,
    pub is_ignored: bool,
    pub is_pinned: bool,
}

impl<'a> ClassifyInputs<'a> {
    /// Inputs for a path given its hash on each side.
    pub fn from_hashes(
        fork_hash: Option<&'a str>,
        upstream_hash: Option<&'a str>,
        base_hash: Option<&'a str>,
        is_ignored: bool,
        is_pinned: bool,
    ) -> Self {
        Self {
            exists_in_fork: fork_hash.is_some(),
            exists_in_upstream: upstream_hash.is_some(),
            fork_hash,
            upstream_hash,
            base_hash,
            is_ignored,
            is_pinned,
        }
    }
}

/// The status of one path.
pub fn classify_status(inputs: &ClassifyInputs<'_>) -> FileStatus {
    let ClassifyInputs {
        exists_in_fork,
        exists_in_upstream,
        fork_hash,
        upstream_hash,
        base_hash,
        is_ignored,
        is_pinned,
    } = *inputs;

    match (exists_in_fork, exists_in_upstream) {
        _ if is_ignored => FileStatus::Ignored,
        (false, true) if is_pinned => FileStatus::Deleted,
        (false, true) => FileStatus::Behind,
        (true, false) if base_hash.is_none() || is_pinned => FileStatus::Ahead,
        (true, false) => FileStatus::Behind,
        _ if fork_hash == upstream_hash => FileStatus::Identical,
        _ => {
            let fork_changed = fork_hash != base_hash;
            let upstream_changed = upstream_hash != base_hash;
            match (fork_changed, upstream_changed) {
                (true, true) if is_pinned => FileStatus::Pinned,
                (true, true) => FileStatus::Diverged,
                (true, false) if is_pinned => FileStatus::Ahead,
                (true, false) => FileStatus::Drifted,
                (false, true) => FileStatus::Behind,
                (false, false) => FileStatus::Identical,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The three revisions a classification compares.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyRefs<'a> {
    pub fork: &'a str,
    pub upstream: &'a str,
    pub base: &'a str,
}

/// Three tree listings and two change sets, already read.
#[derive(Debug, Clone, Default)]
pub struct TreeSnapshot {
    pub fork: TreeListing,
    pub upstream: TreeListing,
    pub base: TreeListing,
    pub fork_changes: BTreeSet<String>,
    pub upstream_changes: BTreeSet<String>,
}

impl TreeSnapshot {
    /// Read all inputs for `refs`, issuing the five reads together.
    #[instrument(skip(repo))]
    pub async fn read<R: RepoAccessor>(repo: &R, refs: ClassifyRefs<'_>) -> Result<Self, GitError> {
        let (fork, upstream, base, fork_changes, upstream_changes) = tokio::try_join!(
            repo.list_tree(refs.fork),
            repo.list_tree(refs.upstream),
            repo.list_tree(refs.base),
            repo.changed_paths(refs.base, refs.fork),
            repo.changed_paths(refs.base, refs.upstream),
        )?;
        debug!(
            fork = fork.len(),
            upstream = upstream.len(),
            base = base.len(),
            fork_changes = fork_changes.len(),
            upstream_changes = upstream_changes.len(),
            "read tree snapshot"
        );
        Ok(Self {
            fork,
            upstream,
            base,
            fork_changes,
            upstream_changes,
        })
    }

    /// One record per candidate path, sorted by path.
    pub fn classify(&self, policy: &OverridePolicy) -> Vec<FileRecord> {
        let candidates: BTreeSet<&String> = self
            .fork_changes
            .iter()
            .chain(&self.upstream_changes)
            .chain(self.fork.keys())
            .chain(self.upstream.keys())
            .collect();

        let mut fast_path = 0usize;
        let records: Vec<FileRecord> = candidates
            .into_iter()
            .map(|path| {
                let fork_hash = self.fork.get(path).map(|e| e.oid.as_str());
                let upstream_hash = self.upstream.get(path).map(|e| e.oid.as_str());
                let base_hash = self.base.get(path).map(|e| e.oid.as_str());
                let is_ignored = policy.is_ignored(path);
                let is_pinned = policy.is_pinned(path);
                let inputs = ClassifyInputs::from_hashes(
                    fork_hash,
                    upstream_hash,
                    base_hash,
                    is_ignored,
                    is_pinned,
                );

                let untouched = !self.fork_changes.contains(path)
                    && !self.upstream_changes.contains(path)
                    && inputs.exists_in_fork
                    && inputs.exists_in_upstream;
                let status = if untouched && !is_ignored {
                    fast_path += 1;
                    FileStatus::Identical
                } else {
                    classify_status(&inputs)
                };

                build_record(path, &inputs, status)
            })
            .collect();

        debug!(records = records.len(), fast_path, "classified paths");
        records
    }
}

/// Classify every path touched by fork or upstream since `refs.base`.
pub async fn classify<R: RepoAccessor>(
    repo: &R,
    policy: &OverridePolicy,
    refs: ClassifyRefs<'_>,
) -> Result<Vec<FileRecord>, GitError> {
    let snapshot = TreeSnapshot::read(repo, refs).await?;
    let records = snapshot.classify(policy);
    info!(
        fork = refs.fork,
        upstream = refs.upstream,
        records = records.len(),
        "classification complete"
    );
    Ok(records)
}

fn build_record(path: &str, inputs: &ClassifyInputs<'_>, status: FileStatus) -> FileRecord {
    FileRecord {
        path: path.to_string(),
        exists_in_fork: inputs.exists_in_fork,
        exists_in_upstream: inputs.exists_in_upstream,
        fork_hash: inputs.fork_hash.map(str::to_string),
        upstream_hash: inputs.upstream_hash.map(str::to_string),
        base_hash: inputs.base_hash.map(str::to_string),
        is_ignored: inputs.is_ignored,
        is_pinned: inputs.is_pinned,
        status,
        has_conflict: None,
        fork_change: None,
        upstream_change: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
