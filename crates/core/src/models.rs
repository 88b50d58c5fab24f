//! Domain model types used throughout forksync.
//!
//! These types are produced by the classification and resolution engines and
//! consumed by presentation code.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// File status
// ---------------------------------------------------------------------------

/// How a single path relates across fork, upstream, and their merge-base.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Same content on both sides.
    Identical,
    /// Fork-only file, or a pinned file only the fork changed.
    Ahead,
    /// Not produced by the classifier; kept for presentation code.
    Local,
    /// Fork changed it, upstream did not, and no override protects it.
    Drifted,
    /// Upstream changed, added, or deleted it and the fork should follow.
    Behind,
    /// Both sides changed it.
    Diverged,
    /// Both sides changed it and the fork's version wins.
    Pinned,
    /// Excluded from sync.
    Ignored,
    /// Pinned path the fork chose not to have.
    Deleted,
    /// Not produced by the classifier; kept for presentation code.
    Renamed,
}

impl FileStatus {
    /// Every status, in display order.
    pub const ALL: [FileStatus; 10] = [
        Self::Identical,
        Self::Ahead,
        Self::Local,
        Self::Drifted,
        Self::Behind,
        Self::Diverged,
        Self::Pinned,
        Self::Ignored,
        Self::Deleted,
        Self::Renamed,
    ];

    /// Short label for logs and tables.
    pub fn label(self) -> &'static str {
        match self {
            Self::Identical => "identical",
            Self::Ahead => "ahead",
            Self::Local => "local",
            Self::Drifted => "drifted",
            Self::Behind => "behind",
            Self::Diverged => "diverged",
            Self::Pinned => "pinned",
            Self::Ignored => "ignored",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
        }
    }

    /// Fork edits that a sync would not protect.
    pub fn is_at_risk(self) -> bool {
        matches!(self, Self::Drifted)
    }

    /// Statuses a user usually wants to look at before syncing.
    pub fn needs_attention(self) -> bool {
        matches!(self, Self::Drifted | Self::Diverged | Self::Behind)
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// File record
// ---------------------------------------------------------------------------

/// Last change to a path on one side (display only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeInfo {
    pub short_sha: String,
    pub date: DateTime<FixedOffset>,
}

/// One path touched by fork, upstream, or both since the merge-base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub exists_in_fork: bool,
    pub exists_in_upstream: bool,
    pub fork_hash: Option<String>,
    pub upstream_hash: Option<String>,
    pub base_hash: Option<String>,
    pub is_ignored: bool,
    pub is_pinned: bool,
    pub status: FileStatus,
    /// Set only after a real merge attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_conflict: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork_change: Option<ChangeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_change: Option<ChangeInfo>,
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Number of records per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub identical: usize,
    pub ahead: usize,
    pub local: usize,
    pub drifted: usize,
    pub behind: usize,
    pub diverged: usize,
    pub pinned: usize,
    pub ignored: usize,
    pub deleted: usize,
    pub renamed: usize,
}

impl StatusCounts {
    /// Tally a set of records.
    pub fn from_records(records: &[FileRecord]) -> Self {
        let mut counts = Self::default();
        for record in records {
            *counts.slot_mut(record.status) += 1;
        }
        counts
    }

    /// Count for one status.
    pub fn get(&self, status: FileStatus) -> usize {
        match status {
            FileStatus::Identical => self.identical,
            FileStatus::Ahead => self.ahead,
            FileStatus::Local => self.local,
            FileStatus::Drifted => self.drifted,
            FileStatus::Behind => self.behind,
            FileStatus::Diverged => self.diverged,
            FileStatus::Pinned => self.pinned,
            FileStatus::Ignored => self.ignored,
            FileStatus::Deleted => self.deleted,
            FileStatus::Renamed => self.renamed,
        }
    }

    fn slot_mut(&mut self, status: FileStatus) -> &mut usize {
        match status {
            FileStatus::Identical => &mut self.identical,
            FileStatus::Ahead => &mut self.ahead,
            FileStatus::Local => &mut self.local,
            FileStatus::Drifted => &mut self.drifted,
            FileStatus::Behind => &mut self.behind,
            FileStatus::Diverged => &mut self.diverged,
            FileStatus::Pinned => &mut self.pinned,
            FileStatus::Ignored => &mut self.ignored,
            FileStatus::Deleted => &mut self.deleted,
            FileStatus::Renamed => &mut self.renamed,
        }
    }

    pub fn total(&self) -> usize {
        FileStatus::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

// ---------------------------------------------------------------------------
// Merge result
// ---------------------------------------------------------------------------

/// Summary of a commit (upstream tip shown to the user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub short_sha: String,
    pub subject: String,
    pub date: DateTime<FixedOffset>,
}

/// Where a session's inputs came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProvenance {
    pub fork_url: Option<String>,
    pub upstream_url: String,
    pub upstream_ref: String,
    pub merge_base: String,
    pub upstream_commit: CommitInfo,
}

/// Output of one sync session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    pub files: Vec<FileRecord>,
    pub summary: StatusCounts,
    /// Paths still carrying conflict markers (or that would, for a dry run).
    pub conflicts: Vec<String>,
    /// Conflicted paths resolved automatically by override policy.
    pub auto_resolved: usize,
    pub success: bool,
    pub dry_run: bool,
    pub provenance: SessionProvenance,
}

impl MergeResult {
    /// Records with a given status.
    pub fn with_status(&self, status: FileStatus) -> impl Iterator<Item = &FileRecord> {
        self.files.iter().filter(move |r| r.status == status)
    }
}
