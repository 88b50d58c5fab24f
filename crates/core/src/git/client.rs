//! Asynchronous git CLI client.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use chrono::{DateTime, FixedOffset};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{RepoAccessor, TreeEntry, TreeListing};
use crate::config::MergeStrategy;
use crate::errors::GitError;
use crate::models::{ChangeInfo, CommitInfo};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// How a real merge ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merged without conflicts; nothing committed.
    Clean,
    /// Merged with conflict markers left in these paths.
    Conflicted(BTreeSet<String>),
}

impl MergeOutcome {
    pub fn conflicts(&self) -> BTreeSet<String> {
        match self {
            Self::Clean => BTreeSet::new(),
            Self::Conflicted(paths) => paths.clone(),
        }
    }
}

/// How a lease-protected push ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The remote ref no longer matched the expected value.
    StaleLease,
}

// ---------------------------------------------------------------------------
// Temporary index
// ---------------------------------------------------------------------------

/// An index file separate from the repository's real index.
///
/// Passed explicitly to the plumbing calls that read or write it. The file is
/// removed by [`TempIndex::remove`] or on drop.
#[derive(Debug)]
pub struct TempIndex {
    path: PathBuf,
    removed: bool,
}

impl TempIndex {
    /// Claim `path` for a fresh index, discarding any leftover file.
    pub fn create(path: PathBuf) -> Result<Self, GitError> {
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale temporary index"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(GitError::IoError(e)),
        }
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the index file now.
    pub fn remove(mut self) {
        self.delete();
    }

    fn delete(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed temporary index"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove temporary index"),
        }
    }
}

impl Drop for TempIndex {
    fn drop(&mut self) {
        self.delete();
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Runs `git` inside one working directory (main checkout or a worktree).
#[derive(Debug, Clone)]
pub struct GitCli {
    work_dir: PathBuf,
}

impl GitCli {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Absolute path of the repository's git directory.
    pub async fn git_dir(&self) -> Result<PathBuf, GitError> {
        let out = self.run(&["rev-parse", "--absolute-git-dir"]).await?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Top of the working tree.
    pub async fn toplevel(&self) -> Result<PathBuf, GitError> {
        let out = self.run(&["rev-parse", "--show-toplevel"]).await?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Short name of the checked-out branch, or `None` when detached.
    pub async fn current_branch(&self) -> Result<Option<String>, GitError> {
        let output = self
            .output(&["symbolic-ref", "--quiet", "--short", "HEAD"], None)
            .await?;
        if output.status.success() {
            Ok(Some(stdout_of(&output).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Resolve `rev` to a full object id.
    pub async fn rev_parse(&self, rev: &str) -> Result<String, GitError> {
        self.try_rev_parse(rev)
            .await?
            .ok_or_else(|| GitError::RefNotFound(rev.to_string()))
    }

    /// Resolve `rev`, or `None` if it does not exist.
    pub async fn try_rev_parse(&self, rev: &str) -> Result<Option<String>, GitError> {
        let spec = format!("{rev}^{{commit}}");
        let output = self
            .output(&["rev-parse", "--verify", "--quiet", &spec], None)
            .await?;
        if output.status.success() {
            Ok(Some(stdout_of(&output).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Most recent common ancestor of `a` and `b`, if any.
    #[instrument(skip(self))]
    pub async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>, GitError> {
        let output = self.output(&["merge-base", a, b], None).await?;
        match output.status.code() {
            Some(0) => Ok(Some(stdout_of(&output).trim().to_string())),
            Some(1) => Ok(None),
            _ => Err(command_failed("merge-base", &output)),
        }
    }

    // -----------------------------------------------------------------------
    // Remotes
    // -----------------------------------------------------------------------

    /// URL of `remote`, or `None` if it is not configured.
    pub async fn remote_url(&self, remote: &str) -> Result<Option<String>, GitError> {
        let output = self.output(&["remote", "get-url", remote], None).await?;
        if output.status.success() {
            Ok(Some(stdout_of(&output).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Make `remote` point at `url`, adding it if necessary.
    #[instrument(skip(self))]
    pub async fn ensure_remote(&self, remote: &str, url: &str) -> Result<(), GitError> {
        match self.remote_url(remote).await? {
            Some(current) if current == url => {
                debug!(remote, "remote already configured");
            }
            Some(current) => {
                info!(remote, from = %current, to = url, "updating remote url");
                self.run(&["remote", "set-url", remote, url]).await?;
            }
            None => {
                info!(remote, url, "adding remote");
                self.run(&["remote", "add", remote, url]).await?;
            }
        }
        Ok(())
    }

    /// Fetch `branch` from `remote` into `refs/remotes/<remote>/<branch>`.
    #[instrument(skip(self))]
    pub async fn fetch(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        info!(remote, branch, "fetching");
        let refspec = tracking_refspec(remote, branch);
        self.run(&["fetch", "--no-tags", remote, &refspec]).await?;
        Ok(())
    }

    /// Like [`fetch`](Self::fetch) but returns `false` when the remote has
    /// no such branch.
    pub async fn fetch_if_exists(&self, remote: &str, branch: &str) -> Result<bool, GitError> {
        let refspec = tracking_refspec(remote, branch);
        let output = self
            .output(&["fetch", "--no-tags", remote, &refspec], None)
            .await?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("couldn't find remote ref") {
            debug!(remote, branch, "remote branch does not exist yet");
            return Ok(false);
        }
        Err(command_failed("fetch", &output))
    }

    // -----------------------------------------------------------------------
    // Merge
    // -----------------------------------------------------------------------

    /// Start a real merge of `rev` without committing.
    ///
    /// Conflicts are an expected outcome; any other failure is an error.
    #[instrument(skip(self))]
    pub async fn merge(&self, rev: &str, strategy: MergeStrategy) -> Result<MergeOutcome, GitError> {
        let args: Vec<&str> = match strategy {
            MergeStrategy::Merge => vec!["merge", "--no-commit", "--no-ff", "--no-edit", rev],
            MergeStrategy::Squash => vec!["merge", "--squash", "--no-commit", rev],
        };
        let output = self.output(&args, None).await?;
        if output.status.success() {
            info!(rev, %strategy, "merge completed without conflicts");
            return Ok(MergeOutcome::Clean);
        }

        let conflicts = self.conflicted_paths().await?;
        if conflicts.is_empty() {
            return Err(command_failed("merge", &output));
        }
        info!(rev, count = conflicts.len(), "merge left conflicts");
        Ok(MergeOutcome::Conflicted(conflicts))
    }

    /// Abort an in-progress merge. A no-op if none is in progress.
    pub async fn merge_abort(&self) -> Result<(), GitError> {
        let output = self.output(&["merge", "--abort"], None).await?;
        if !output.status.success() {
            debug!(stderr = %String::from_utf8_lossy(&output.stderr).trim(), "no merge to abort");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Summary of the commit at `rev`.
    pub async fn commit_info(&self, rev: &str) -> Result<CommitInfo, GitError> {
        let out = self
            .run(&["log", "-1", "--format=%H%x00%h%x00%s%x00%cI", rev, "--"])
            .await?;
        let fields: Vec<&str> = out.trim_end_matches('\n').split('\0').collect();
        match fields.as_slice() {
            [sha, short_sha, subject, date] => Ok(CommitInfo {
                sha: sha.to_string(),
                short_sha: short_sha.to_string(),
                subject: subject.to_string(),
                date: parse_commit_date(date)?,
            }),
            _ => Err(GitError::UnexpectedOutput {
                command: "log".into(),
                detail: format!("expected 4 fields, got {}", fields.len()),
            }),
        }
    }

    /// Last commit reachable from `rev` that touched `path`.
    pub async fn last_change(&self, rev: &str, path: &str) -> Result<Option<ChangeInfo>, GitError> {
        let out = self
            .run(&["log", "-1", "--format=%h%x00%cI", rev, "--", path])
            .await?;
        let line = out.trim_end_matches('\n');
        if line.is_empty() {
            return Ok(None);
        }
        let Some((short_sha, date)) = line.split_once('\0') else {
            return Err(GitError::UnexpectedOutput {
                command: "log".into(),
                detail: format!("expected 2 fields in {line:?}"),
            });
        };
        Ok(Some(ChangeInfo {
            short_sha: short_sha.to_string(),
            date: parse_commit_date(date)?,
        }))
    }

    // -----------------------------------------------------------------------
    // Worktrees
    // -----------------------------------------------------------------------

    /// Create a detached worktree of `rev` at `path`.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn worktree_add_detached(&self, path: &Path, rev: &str) -> Result<(), GitError> {
        let path_str = path.to_string_lossy().to_string();
        self.run(&["worktree", "add", "--detach", &path_str, rev])
            .await?;
        info!("worktree created");
        Ok(())
    }

    /// Force-remove the worktree at `path`. Succeeds if it is already gone.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn worktree_remove(&self, path: &Path) -> Result<(), GitError> {
        let path_str = path.to_string_lossy().to_string();
        let output = self
            .output(&["worktree", "remove", "--force", &path_str], None)
            .await?;
        if !output.status.success() {
            debug!(stderr = %String::from_utf8_lossy(&output.stderr).trim(), "worktree remove reported an error");
        }
        if path.exists() {
            tokio::fs::remove_dir_all(path).await?;
        }
        self.run(&["worktree", "prune"]).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    /// Write the file at `file` into the object store, applying the clean
    /// filters configured for `rel_path`.
    pub async fn hash_object_write(&self, file: &Path, rel_path: &str) -> Result<String, GitError> {
        let path_arg = format!("--path={rel_path}");
        let file_str = file.to_string_lossy().to_string();
        let out = self
            .run(&["hash-object", "-w", &path_arg, "--", &file_str])
            .await?;
        Ok(out.trim().to_string())
    }

    /// Load the tree of `rev` into `index`.
    pub async fn read_tree(&self, index: &TempIndex, rev: &str) -> Result<(), GitError> {
        self.run_with_index(index, &["read-tree", rev]).await?;
        Ok(())
    }

    /// Point `path` in `index` at an existing object.
    pub async fn update_index_cacheinfo(
        &self,
        index: &TempIndex,
        entry: &TreeEntry,
        path: &str,
    ) -> Result<(), GitError> {
        let cacheinfo = format!("{},{},{}", entry.mode, entry.oid, path);
        self.run_with_index(index, &["update-index", "--add", "--cacheinfo", &cacheinfo])
            .await?;
        Ok(())
    }

    /// Write `index` out as a tree object.
    pub async fn write_tree(&self, index: &TempIndex) -> Result<String, GitError> {
        let out = self.run_with_index(index, &["write-tree"]).await?;
        Ok(out.trim().to_string())
    }

    /// Create a commit for `tree` with a single explicit parent.
    pub async fn commit_tree(&self, tree: &str, parent: &str, message: &str) -> Result<String, GitError> {
        let out = self
            .run(&["commit-tree", tree, "-p", parent, "-m", message])
            .await?;
        Ok(out.trim().to_string())
    }

    /// Point `refname` at `oid`, creating it if needed.
    pub async fn update_ref(&self, refname: &str, oid: &str) -> Result<(), GitError> {
        self.run(&["update-ref", refname, oid]).await?;
        Ok(())
    }

    /// Push `branch` with a lease on the remote's current value.
    ///
    /// `expected = None` means the branch must not exist on the remote.
    #[instrument(skip(self))]
    pub async fn push_with_lease(
        &self,
        remote: &str,
        branch: &str,
        expected: Option<&str>,
    ) -> Result<PushOutcome, GitError> {
        let lease = format!(
            "--force-with-lease=refs/heads/{branch}:{}",
            expected.unwrap_or("")
        );
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let output = self
            .output(&["push", "--porcelain", &lease, remote, &refspec], None)
            .await?;
        if output.status.success() {
            info!(remote, branch, "pushed with lease");
            return Ok(PushOutcome::Pushed);
        }
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if combined.contains("stale info") {
            warn!(remote, branch, "push lease is stale");
            return Ok(PushOutcome::StaleLease);
        }
        Err(command_failed("push", &output))
    }

    /// Push `branch` unconditionally.
    #[instrument(skip(self))]
    pub async fn push_force(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        let refspec = format!("+refs/heads/{branch}:refs/heads/{branch}");
        self.run(&["push", "--porcelain", remote, &refspec]).await?;
        info!(remote, branch, "force-pushed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Process plumbing
    // -----------------------------------------------------------------------

    async fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.output(args, None).await?;
        if !output.status.success() {
            return Err(command_failed(args.first().copied().unwrap_or("git"), &output));
        }
        Ok(stdout_of(&output))
    }

    async fn run_with_index(&self, index: &TempIndex, args: &[&str]) -> Result<String, GitError> {
        let output = self.output(args, Some(index.path())).await?;
        if !output.status.success() {
            return Err(command_failed(args.first().copied().unwrap_or("git"), &output));
        }
        Ok(stdout_of(&output))
    }

    async fn output(&self, args: &[&str], index: Option<&Path>) -> Result<Output, GitError> {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.work_dir)
            .args(args)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        match index {
            Some(path) => {
                cmd.env("GIT_INDEX_FILE", path);
            }
            None => {
                cmd.env_remove("GIT_INDEX_FILE");
            }
        }

        debug!(cmd = ?format!("git {}", args.join(" ")), dir = %self.work_dir.display(), "running git command");
        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GitError::BinaryNotFound("git".into())
            } else {
                GitError::IoError(e)
            }
        })?;
        Ok(output)
    }
}

impl RepoAccessor for GitCli {
    #[instrument(skip(self))]
    async fn list_tree(&self, rev: &str) -> Result<TreeListing, GitError> {
        let out = self
            .run(&["ls-tree", "-r", "-z", "--full-tree", rev])
            .await?;
        let listing = parse_ls_tree(&out)?;
        debug!(rev, entries = listing.len(), "listed tree");
        Ok(listing)
    }

    #[instrument(skip(self))]
    async fn changed_paths(&self, from: &str, to: &str) -> Result<BTreeSet<String>, GitError> {
        let out = self
            .run(&["diff", "--name-only", "-z", "--no-renames", from, to, "--"])
            .await?;
        Ok(split_nul(&out))
    }

    async fn conflicted_paths(&self) -> Result<BTreeSet<String>, GitError> {
        let out = self
            .run(&["diff", "--name-only", "-z", "--diff-filter=U"])
            .await?;
        Ok(split_nul(&out))
    }

    async fn restore_path(&self, rev: &str, path: &str) -> Result<(), GitError> {
        debug!(rev, path, "restoring path");
        self.run(&["checkout", rev, "--", path]).await?;
        Ok(())
    }

    async fn remove_path(&self, path: &str) -> Result<(), GitError> {
        debug!(path, "removing path");
        self.run(&["rm", "-f", "-q", "--ignore-unmatch", "--", path])
            .await?;
        // An unmerged path that only exists in the working tree survives `git rm`.
        let full = self.work_dir.join(path);
        match tokio::fs::symlink_metadata(&full).await {
            Ok(_) => tokio::fs::remove_file(&full).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(GitError::IoError(e)),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn tracking_refspec(remote: &str, branch: &str) -> String {
    format!("+refs/heads/{branch}:refs/remotes/{remote}/{branch}")
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn command_failed(command: &str, output: &Output) -> GitError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let exit_code = output.status.code().unwrap_or(-1);
    warn!(command, exit_code, %stderr, "git command failed");
    GitError::CommandFailed {
        command: command.to_string(),
        exit_code,
        stderr,
    }
}

/// Parse a strict ISO 8601 committer date (`%cI`).
fn parse_commit_date(date: &str) -> Result<DateTime<FixedOffset>, GitError> {
    DateTime::parse_from_rfc3339(date.trim()).map_err(|e| GitError::UnexpectedOutput {
        command: "log".into(),
        detail: format!("bad commit date {date:?}: {e}"),
    })
}

fn split_nul(out: &str) -> BTreeSet<String> {
    out.split('\0')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `git ls-tree -r -z` output: `<mode> <type> <oid>\t<path>\0`.
fn parse_ls_tree(out: &str) -> Result<TreeListing, GitError> {
    let mut listing = TreeListing::new();
    for record in out.split('\0').filter(|r| !r.is_empty()) {
        let (meta, path) = record.split_once('\t').ok_or_else(|| GitError::UnexpectedOutput {
            command: "ls-tree".into(),
            detail: format!("missing tab in '{record}'"),
        })?;
        let mut parts = meta.split(' ');
        let (Some(mode), Some(kind), Some(oid)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(GitError::UnexpectedOutput {
                command: "ls-tree".into(),
                detail: format!("malformed entry '{meta}'"),
            });
        };
        if kind == "tree" {
            continue;
        }
        listing.insert(path.to_string(), TreeEntry::new(mode, oid));
    }
    Ok(listing)
}
