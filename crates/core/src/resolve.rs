//! Resolution of a real merge according to classification and overrides.
//!
//! Runs after a no-commit merge of upstream has been started in the working
//! copy. Each record maps to one [`FileAction`]. Conflicts are auto-resolved
//! only for ignored and pinned paths; every other conflicted path is left
//! with its markers for manual resolution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::errors::GitError;
use crate::git::RepoAccessor;
use crate::models::{FileRecord, FileStatus};

/// What the engine does to one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    /// The working copy is already right.
    Keep,
    /// Put back the fork's pre-merge version.
    RestoreFork,
    /// Materialize upstream's version.
    TakeUpstream,
    /// Trust whatever the real merge produced.
    AcceptMerge,
    /// Remove the path if present.
    Remove,
}

impl FileAction {
    /// The action for a classified record.
    pub fn for_record(record: &FileRecord) -> Self {
        match record.status {
            FileStatus::Identical | FileStatus::Local | FileStatus::Renamed => Self::Keep,
            // An upstream deletion of a pinned file must not reach the fork.
            FileStatus::Ahead if record.is_pinned && record.exists_in_fork => Self::RestoreFork,
            FileStatus::Ahead | FileStatus::Drifted => Self::Keep,
            FileStatus::Ignored | FileStatus::Pinned => Self::override_action(record),
            FileStatus::Diverged => Self::AcceptMerge,
            FileStatus::Behind if !record.exists_in_fork => Self::TakeUpstream,
            FileStatus::Behind if !record.exists_in_upstream => Self::Remove,
            FileStatus::Behind => Self::AcceptMerge,
            FileStatus::Deleted => Self::Remove,
        }
    }

    /// Fork wins: keep its version, or its absence.
    fn override_action(record: &FileRecord) -> Self {
        if record.exists_in_fork {
            Self::RestoreFork
        } else {
            Self::Remove
        }
    }
}

/// Outcome of resolving one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    /// Paths the real merge reported as conflicted.
    pub merge_conflicts: Vec<String>,
    /// Conflicts cleared because the path is ignored or pinned.
    pub auto_resolved: usize,
    /// Paths still carrying conflict markers.
    pub unresolved: Vec<String>,
    /// Number of paths per action applied.
    pub actions: BTreeMap<String, usize>,
}

impl ResolutionReport {
    pub fn success(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Applies file actions to the working copy of `repo`.
pub struct Resolver<'a, R> {
    repo: &'a R,
    fork_ref: &'a str,
    upstream_ref: &'a str,
}

impl<'a, R: RepoAccessor> Resolver<'a, R> {
    /// `fork_ref` must still name the fork's pre-merge commit.
    pub fn new(repo: &'a R, fork_ref: &'a str, upstream_ref: &'a str) -> Self {
        Self {
            repo,
            fork_ref,
            upstream_ref,
        }
    }

    /// Resolve every record, then sweep remaining override conflicts.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn resolve(&self, records: &[FileRecord]) -> Result<ResolutionReport, GitError> {
        let merge_conflicts = self.repo.conflicted_paths().await?;
        let mut report = ResolutionReport {
            merge_conflicts: merge_conflicts.iter().cloned().collect(),
            ..Default::default()
        };

        for record in records {
            let action = FileAction::for_record(record);
            self.apply(record, action).await?;
            if action != FileAction::Keep {
                *report.actions.entry(action_label(action).to_string()).or_default() += 1;
            }
        }

        let by_path: BTreeMap<&str, &FileRecord> =
            records.iter().map(|r| (r.path.as_str(), r)).collect();

        for path in self.repo.conflicted_paths().await? {
            match by_path.get(path.as_str()) {
                Some(record) if record.is_ignored || record.is_pinned => {
                    debug!(path = %path, "resolving override conflict");
                    self.apply(record, FileAction::override_action(record)).await?;
                }
                Some(_) => {}
                None => warn!(path = %path, "conflicted path was not classified"),
            }
        }

        report.auto_resolved = merge_conflicts
            .iter()
            .filter_map(|p| by_path.get(p.as_str()))
            .filter(|r| r.is_ignored || r.is_pinned)
            .count();
        report.unresolved = self.repo.conflicted_paths().await?.into_iter().collect();

        info!(
            merge_conflicts = report.merge_conflicts.len(),
            auto_resolved = report.auto_resolved,
            unresolved = report.unresolved.len(),
            "resolution complete"
        );
        Ok(report)
    }

    async fn apply(&self, record: &FileRecord, action: FileAction) -> Result<(), GitError> {
        match action {
            FileAction::Keep | FileAction::AcceptMerge => Ok(()),
            FileAction::RestoreFork => {
                debug!(path = %record.path, status = %record.status, "keeping fork version");
                self.repo.restore_path(self.fork_ref, &record.path).await
            }
            FileAction::TakeUpstream => {
                debug!(path = %record.path, "taking upstream version");
                self.repo.restore_path(self.upstream_ref, &record.path).await
            }
            FileAction::Remove => {
                debug!(path = %record.path, status = %record.status, "removing path");
                self.repo.remove_path(&record.path).await
            }
        }
    }
}

fn action_label(action: FileAction) -> &'static str {
    match action {
        FileAction::Keep => "keep",
        FileAction::RestoreFork => "restore_fork",
        FileAction::TakeUpstream => "take_upstream",
        FileAction::AcceptMerge => "accept_merge",
        FileAction::Remove => "remove",
    }
}
