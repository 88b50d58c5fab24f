//! Sync session orchestration.
//!
//! A [`SyncSession`] sequences one invocation:
//!
//! 1. Point the upstream remote at the configured URL and fetch.
//! 2. Compute the merge-base of `HEAD` and the upstream ref.
//! 3. Classify every touched path.
//! 4. Dry run: merge inside a throwaway worktree to find conflicts.
//!    Apply: merge in place and resolve according to overrides.
//!
//! Review-branch publishing reuses steps 1-3.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::classify::{classify, ClassifyRefs};
use crate::config::ForkSyncConfig;
use crate::errors::{GitError, SyncError};
use crate::git::{GitCli, MergeOutcome, RepoAccessor};
use crate::models::{FileRecord, FileStatus, MergeResult, SessionProvenance, StatusCounts};
use crate::overrides::{has_wildcard, PolicyWarning};
use crate::publish::{BranchPublisher, PublishReport};
use crate::resolve::{FileAction, Resolver};
use crate::worktree::{InterruptHandle, IsolationManager, WorktreeState};

/// The fork side of every comparison.
const FORK_REF: &str = "HEAD";

/// Whether a session changes the fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Preview only; the main working copy is never touched.
    DryRun,
    /// Merge upstream into the working copy and resolve overrides.
    Apply,
}

/// Refs and URLs established at the start of a session.
#[derive(Debug, Clone)]
struct Prepared {
    upstream_ref: String,
    merge_base: String,
}

/// One sync invocation against a fork.
#[derive(Debug)]
pub struct SyncSession {
    config: ForkSyncConfig,
    fork_root: PathBuf,
    repo: GitCli,
    isolation: IsolationManager,
}

impl SyncSession {
    pub fn new(fork_root: impl Into<PathBuf>, config: ForkSyncConfig) -> Self {
        let fork_root = fork_root.into();
        let repo = GitCli::new(&fork_root);
        let worktree_root = config
            .session
            .worktree_root
            .clone()
            .unwrap_or_else(IsolationManager::default_root);
        let isolation = IsolationManager::new(repo.clone(), worktree_root);
        Self {
            config,
            fork_root,
            repo,
            isolation,
        }
    }

    pub fn config(&self) -> &ForkSyncConfig {
        &self.config
    }

    pub fn fork_root(&self) -> &Path {
        &self.fork_root
    }

    /// Handle for signal handlers to clean up the preview worktree.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.isolation.interrupt_handle()
    }

    /// Name used for `contrib/<name>`.
    pub fn fork_name(&self) -> String {
        self.config.fork.name.clone().unwrap_or_else(|| {
            self.fork_root
                .canonicalize()
                .unwrap_or_else(|_| self.fork_root.clone())
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "fork".into())
        })
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Run one sync and return the classified result.
    #[instrument(skip(self), fields(fork = %self.fork_root.display()))]
    pub async fn run(&self, mode: SessionMode) -> Result<MergeResult, SyncError> {
        let prepared = self.prepare().await?;
        let refs = ClassifyRefs {
            fork: FORK_REF,
            upstream: &prepared.upstream_ref,
            base: &prepared.merge_base,
        };
        let mut records = classify(&self.repo, &self.config.overrides, refs).await?;
        if self.config.session.provenance {
            self.annotate_changes(&mut records, &prepared.upstream_ref)
                .await?;
        }

        let (conflicts, auto_resolved) = match mode {
            SessionMode::DryRun => self.preview(&mut records, &prepared).await?,
            SessionMode::Apply => self.apply(&mut records, &prepared).await?,
        };

        let provenance = self.provenance(&prepared).await?;
        let result = MergeResult {
            summary: StatusCounts::from_records(&records),
            files: records,
            success: conflicts.is_empty(),
            conflicts,
            auto_resolved,
            dry_run: mode == SessionMode::DryRun,
            provenance,
        };
        info!(
            dry_run = result.dry_run,
            files = result.files.len(),
            conflicts = result.conflicts.len(),
            auto_resolved = result.auto_resolved,
            "sync session complete"
        );
        Ok(result)
    }

    /// Configure the remote, fetch, and find the merge-base.
    async fn prepare(&self) -> Result<Prepared, SyncError> {
        let upstream = &self.config.upstream;
        self.repo
            .ensure_remote(&upstream.remote, &upstream.fetch_url())
            .await?;
        self.repo.fetch(&upstream.remote, &upstream.branch).await?;

        let upstream_ref = upstream.tracking_ref();
        let merge_base = self
            .repo
            .merge_base(FORK_REF, &upstream_ref)
            .await?
            .ok_or_else(|| SyncError::NoMergeBase {
                fork: FORK_REF.into(),
                upstream: upstream_ref.clone(),
            })?;
        debug!(%merge_base, %upstream_ref, "merge-base resolved");
        Ok(Prepared {
            upstream_ref,
            merge_base,
        })
    }

    /// Merge in a throwaway worktree and report which conflicts would need
    /// manual resolution.
    async fn preview(
        &self,
        records: &mut [FileRecord],
        prepared: &Prepared,
    ) -> Result<(Vec<String>, usize), SyncError> {
        let mut worktree = self.isolation.acquire(FORK_REF).await?;
        let outcome = async {
            let merged = worktree
                .git()
                .merge(&prepared.upstream_ref, self.config.merge.strategy)
                .await;
            worktree.advance(WorktreeState::MergeAttempted);
            let merged = merged.map_err(|e| merge_failed(&prepared.upstream_ref, e))?;
            worktree.advance(WorktreeState::Analyzed);
            Ok::<_, SyncError>(merged)
        }
        .await;
        let released = worktree.release().await;
        let merged = outcome?;
        released?;

        mark_conflicts(records, &merged.conflicts());
        Ok(predict_resolution(records))
    }

    /// Merge in place and resolve.
    async fn apply(
        &self,
        records: &mut [FileRecord],
        prepared: &Prepared,
    ) -> Result<(Vec<String>, usize), SyncError> {
        match self.repo.current_branch().await? {
            Some(branch) if branch != self.config.fork.branch => {
                warn!(
                    current = %branch,
                    expected = %self.config.fork.branch,
                    "merging into a different branch than configured"
                );
            }
            None => warn!("HEAD is detached"),
            Some(_) => {}
        }

        let merged: MergeOutcome = self
            .repo
            .merge(&prepared.upstream_ref, self.config.merge.strategy)
            .await
            .map_err(|e| merge_failed(&prepared.upstream_ref, e))?;
        mark_conflicts(records, &merged.conflicts());

        let report = Resolver::new(&self.repo, FORK_REF, &prepared.upstream_ref)
            .resolve(records)
            .await?;
        Ok((report.unresolved, report.auto_resolved))
    }

    /// Fill in last-change info for every non-identical record.
    async fn annotate_changes(
        &self,
        records: &mut [FileRecord],
        upstream_ref: &str,
    ) -> Result<(), GitError> {
        for record in records
            .iter_mut()
            .filter(|r| r.status != FileStatus::Identical)
        {
            let fork = async {
                if record.exists_in_fork {
                    self.repo.last_change(FORK_REF, &record.path).await
                } else {
                    Ok(None)
                }
            };
            let upstream = async {
                if record.exists_in_upstream {
                    self.repo.last_change(upstream_ref, &record.path).await
                } else {
                    Ok(None)
                }
            };
            let (fork_change, upstream_change) = tokio::try_join!(fork, upstream)?;
            record.fork_change = fork_change;
            record.upstream_change = upstream_change;
        }
        Ok(())
    }

    async fn provenance(&self, prepared: &Prepared) -> Result<SessionProvenance, SyncError> {
        let (fork_url, upstream_commit) = tokio::try_join!(
            self.repo.remote_url(&self.config.fork.remote),
            self.repo.commit_info(&prepared.upstream_ref),
        )?;
        Ok(SessionProvenance {
            fork_url,
            upstream_url: self.config.upstream.fetch_url(),
            upstream_ref: prepared.upstream_ref.clone(),
            merge_base: prepared.merge_base.clone(),
            upstream_commit,
        })
    }

    // -----------------------------------------------------------------------
    // Review branches
    // -----------------------------------------------------------------------

    /// Publish `contrib/<fork-name>`. With no explicit files, every drifted
    /// file is published.
    #[instrument(skip(self, files))]
    pub async fn contribute(&self, files: Option<Vec<String>>) -> Result<PublishReport, SyncError> {
        let prepared = self.prepare().await?;
        let files = match files {
            Some(files) => files,
            None => {
                let refs = ClassifyRefs {
                    fork: FORK_REF,
                    upstream: &prepared.upstream_ref,
                    base: &prepared.merge_base,
                };
                classify(&self.repo, &self.config.overrides, refs)
                    .await?
                    .into_iter()
                    .filter(|r| r.status == FileStatus::Drifted)
                    .map(|r| r.path)
                    .collect()
            }
        };
        info!(files = files.len(), "publishing contribution branch");

        let publisher = BranchPublisher::open(self.repo.clone()).await?;
        let report = publisher
            .publish_contribution(
                self.config.contrib_remote(),
                &self.fork_name(),
                &prepared.upstream_ref,
                &files,
            )
            .await?;
        Ok(report)
    }

    /// Publish `upstream/pinned` with upstream's versions of pinned files.
    #[instrument(skip(self))]
    pub async fn publish_pinned(&self) -> Result<PublishReport, SyncError> {
        let prepared = self.prepare().await?;
        let policy = &self.config.overrides;
        let upstream_tree = self.repo.list_tree(&prepared.upstream_ref).await?;

        let mut pinned: BTreeSet<String> = upstream_tree
            .keys()
            .filter(|path| policy.is_pinned(path))
            .cloned()
            .collect();
        // Exact pins missing upstream are reported as skipped.
        pinned.extend(
            policy
                .pinned
                .iter()
                .filter(|p| !has_wildcard(p))
                .cloned(),
        );
        let pinned: Vec<String> = pinned.into_iter().collect();
        info!(files = pinned.len(), "publishing pinned-overlay branch");

        let publisher = BranchPublisher::open(self.repo.clone()).await?;
        let report = publisher
            .publish_pinned(
                self.config.pinned_remote(),
                FORK_REF,
                &prepared.upstream_ref,
                &pinned,
            )
            .await?;
        Ok(report)
    }

    /// Check the override patterns against the fork's files.
    pub async fn validate_policy(&self) -> Result<Vec<PolicyWarning>, SyncError> {
        let fork_tree = self.repo.list_tree(FORK_REF).await?;
        let warnings = self
            .config
            .overrides
            .validate(fork_tree.keys().map(String::as_str));
        for warning in &warnings {
            warn!(%warning, "override policy warning");
        }
        Ok(warnings)
    }
}

fn mark_conflicts(records: &mut [FileRecord], conflicts: &BTreeSet<String>) {
    for record in records.iter_mut() {
        record.has_conflict = Some(conflicts.contains(&record.path));
    }
}

/// Conflicts that would survive [`Resolver::resolve`], and how many conflicts
/// the overrides would clear.
///
/// A conflict stays manual only when its file action leaves the merge output
/// in place; restore, take-upstream and remove actions all clear it.
fn predict_resolution(records: &[FileRecord]) -> (Vec<String>, usize) {
    let mut manual = Vec::new();
    let mut overridden = 0;
    for record in records.iter().filter(|r| r.has_conflict == Some(true)) {
        if record.is_ignored || record.is_pinned {
            overridden += 1;
            continue;
        }
        match FileAction::for_record(record) {
            FileAction::Keep | FileAction::AcceptMerge => manual.push(record.path.clone()),
            FileAction::RestoreFork | FileAction::TakeUpstream | FileAction::Remove => {}
        }
    }
    (manual, overridden)
}

fn merge_failed(upstream: &str, err: GitError) -> SyncError {
    match err {
        GitError::CommandFailed { stderr, .. } => SyncError::MergeFailed {
            upstream: upstream.to_string(),
            detail: stderr,
        },
        other => SyncError::GitError(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, ignored: bool, pinned: bool) -> FileRecord {
        FileRecord {
            path: path.into(),
            exists_in_fork: true,
            exists_in_upstream: true,
            fork_hash: Some("f".into()),
            upstream_hash: Some("u".into()),
            base_hash: Some("b".into()),
            is_ignored: ignored,
            is_pinned: pinned,
            status: FileStatus::Diverged,
            has_conflict: None,
            fork_change: None,
            upstream_change: None,
        }
    }

    #[test]
    fn test_mark_conflicts_sets_every_record() {
        let mut records = vec![record("a", false, false), record("b", false, false)];
        let conflicts: BTreeSet<String> = ["a".to_string()].into_iter().collect();
        mark_conflicts(&mut records, &conflicts);
        assert_eq!(records[0].has_conflict, Some(true));
        assert_eq!(records[1].has_conflict, Some(false));
    }

    #[test]
    fn test_predict_resolution_matches_file_actions() {
        let mut diverged = record("shared.ts", false, false);
        diverged.has_conflict = Some(true);

        // Fork edited, upstream deleted: the resolver removes it.
        let mut deleted_upstream = record("a.ts", false, false);
        deleted_upstream.exists_in_upstream = false;
        deleted_upstream.upstream_hash = None;
        deleted_upstream.status = FileStatus::Behind;
        deleted_upstream.has_conflict = Some(true);

        // Fork deleted, upstream edited: the resolver takes upstream.
        let mut deleted_fork = record("b.ts", false, false);
        deleted_fork.exists_in_fork = false;
        deleted_fork.fork_hash = None;
        deleted_fork.status = FileStatus::Behind;
        deleted_fork.has_conflict = Some(true);

        let mut pinned = record("config.json", false, true);
        pinned.status = FileStatus::Pinned;
        pinned.has_conflict = Some(true);

        let clean = record("clean.ts", false, false);

        let records = vec![diverged, deleted_upstream, deleted_fork, pinned, clean];
        let (manual, overridden) = predict_resolution(&records);
        assert_eq!(manual, vec!["shared.ts".to_string()]);
        assert_eq!(overridden, 1);
    }

    #[test]
    fn test_merge_failed_keeps_tool_message() {
        let err = merge_failed(
            "upstream/main",
            GitError::CommandFailed {
                command: "merge".into(),
                exit_code: 128,
                stderr: "error: Your local changes would be overwritten".into(),
            },
        );
        match err {
            SyncError::MergeFailed { upstream, detail } => {
                assert_eq!(upstream, "upstream/main");
                assert!(detail.contains("local changes"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_fork_name_prefers_config() {
        let mut config = ForkSyncConfig::with_upstream("https://example.com/t.git");
        config.fork.name = Some("acme".into());
        let session = SyncSession::new("/tmp/whatever", config);
        assert_eq!(session.fork_name(), "acme");

        let config = ForkSyncConfig::with_upstream("https://example.com/t.git");
        let session = SyncSession::new("/nonexistent/shop-fork", config);
        assert_eq!(session.fork_name(), "shop-fork");
    }
}
