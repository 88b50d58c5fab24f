//! Review-branch publishing through index and object plumbing.
//!
//! Two branches are built the same way: read a baseline tree into a
//! temporary index, overlay selected files, write a tree, commit it with the
//! baseline tip as its only parent, and point the branch at it. The real
//! index and working tree are never touched.
//!
//! | Branch | Baseline | Overlay source | Stale lease |
//! |--------|----------|----------------|-------------|
//! | `contrib/<fork-name>` | upstream tip | fork working-tree bytes | force push |
//! | `upstream/pinned` | fork `HEAD` | upstream tree objects | error |

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::errors::PublishError;
use crate::git::{GitCli, PushOutcome, RepoAccessor, TempIndex, TreeEntry};

/// Branch holding upstream's versions of pinned files.
pub const PINNED_BRANCH: &str = "upstream/pinned";

const CONTRIB_INDEX: &str = "forksync-contrib.index";
const PINNED_INDEX: &str = "forksync-pinned.index";

/// `contrib/<fork-name>`.
pub fn contrib_branch(fork_name: &str) -> String {
    format!("contrib/{fork_name}")
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Why a requested file was left out of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Resolves outside the repository root.
    PathEscape,
    /// Is a symbolic link.
    Symlink,
    /// Does not exist (on disk, or in the source tree).
    Missing,
    /// Exists but is not a regular file.
    NotAFile,
    /// Not a path git can store (inside `.git`, or not in canonical form).
    InvalidPath,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PathEscape => write!(f, "path escapes the repository"),
            Self::Symlink => write!(f, "symbolic links are not published"),
            Self::Missing => write!(f, "file not found"),
            Self::NotAFile => write!(f, "not a regular file"),
            Self::InvalidPath => write!(f, "not a valid repository path"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: SkipReason,
}

/// Result of publishing one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    pub branch: String,
    pub remote: String,
    /// `None` when nothing was publishable.
    pub commit: Option<String>,
    pub published: usize,
    pub skipped: Vec<SkippedFile>,
    /// The lease was stale and the branch was force-pushed anyway.
    pub forced_without_lease: bool,
}

impl PublishReport {
    pub fn success(&self) -> bool {
        self.commit.is_some() && self.published > 0
    }
}

/// What to do when the remote branch moved since it was fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnStaleLease {
    ForcePush,
    Fail,
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Builds and pushes review branches for one repository.
///
/// Concurrent publishers against the same repository share temporary index
/// paths and must be serialized by the caller.
#[derive(Debug)]
pub struct BranchPublisher {
    repo: GitCli,
    repo_root: PathBuf,
    git_dir: PathBuf,
}

impl BranchPublisher {
    /// Resolve the repository root and git directory for `repo`.
    pub async fn open(repo: GitCli) -> Result<Self, PublishError> {
        let toplevel = repo.toplevel().await?;
        let repo_root = tokio::fs::canonicalize(&toplevel).await?;
        let git_dir = repo.git_dir().await?;
        Ok(Self {
            repo,
            repo_root,
            git_dir,
        })
    }

    /// Publish `contrib/<fork_name>`: upstream tip plus the fork's current
    /// on-disk content of `files`.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn publish_contribution(
        &self,
        remote: &str,
        fork_name: &str,
        upstream_ref: &str,
        files: &[String],
    ) -> Result<PublishReport, PublishError> {
        let branch = contrib_branch(fork_name);
        if files.is_empty() {
            return Err(PublishError::NothingToPublish(branch));
        }
        let baseline = self.repo.rev_parse(upstream_ref).await?;

        let mut overlay = Vec::new();
        let mut skipped = Vec::new();
        for path in files {
            match self.stage_from_disk(path).await? {
                Ok(entry) => overlay.push((path.clone(), entry)),
                Err(reason) => {
                    warn!(path = %path, %reason, "skipping file");
                    skipped.push(SkippedFile {
                        path: path.clone(),
                        reason,
                    });
                }
            }
        }

        let message = format!(
            "Contribute {} file(s) from {fork_name}\n\nBased on {upstream_ref} ({}).",
            overlay.len(),
            short(&baseline)
        );
        self.publish(
            PublishPlan {
                branch,
                remote,
                baseline: &baseline,
                index_name: CONTRIB_INDEX,
                message,
                on_stale: OnStaleLease::ForcePush,
            },
            overlay,
            skipped,
        )
        .await
    }

    /// Publish `upstream/pinned`: fork `HEAD` plus upstream's versions of
    /// the pinned paths.
    #[instrument(skip(self, pinned), fields(pinned = pinned.len()))]
    pub async fn publish_pinned(
        &self,
        remote: &str,
        fork_ref: &str,
        upstream_ref: &str,
        pinned: &[String],
    ) -> Result<PublishReport, PublishError> {
        if pinned.is_empty() {
            return Err(PublishError::NothingToPublish(PINNED_BRANCH.into()));
        }
        let baseline = self.repo.rev_parse(fork_ref).await?;
        let upstream_tree = self.repo.list_tree(upstream_ref).await?;

        let mut overlay = Vec::new();
        let mut skipped = Vec::new();
        for path in pinned {
            if let Err(reason) = check_relative(path) {
                skipped.push(SkippedFile {
                    path: path.clone(),
                    reason,
                });
                continue;
            }
            match upstream_tree.get(path) {
                Some(entry) => overlay.push((path.clone(), entry.clone())),
                None => {
                    debug!(path = %path, "pinned path not present upstream");
                    skipped.push(SkippedFile {
                        path: path.clone(),
                        reason: SkipReason::Missing,
                    });
                }
            }
        }

        let message = format!(
            "Upstream versions of {} pinned file(s)\n\nFrom {upstream_ref} over {}.",
            overlay.len(),
            short(&baseline)
        );
        self.publish(
            PublishPlan {
                branch: PINNED_BRANCH.to_string(),
                remote,
                baseline: &baseline,
                index_name: PINNED_INDEX,
                message,
                on_stale: OnStaleLease::Fail,
            },
            overlay,
            skipped,
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Shared pipeline
    // -----------------------------------------------------------------------

    async fn publish(
        &self,
        plan: PublishPlan<'_>,
        overlay: Vec<(String, TreeEntry)>,
        skipped: Vec<SkippedFile>,
    ) -> Result<PublishReport, PublishError> {
        let mut report = PublishReport {
            branch: plan.branch.clone(),
            remote: plan.remote.to_string(),
            commit: None,
            published: overlay.len(),
            skipped,
            forced_without_lease: false,
        };
        if overlay.is_empty() {
            warn!(branch = %plan.branch, "nothing to publish");
            return Ok(report);
        }

        let commit = self
            .build_commit(plan.index_name, plan.baseline, &overlay, &plan.message)
            .await?;
        self.repo
            .update_ref(&format!("refs/heads/{}", plan.branch), &commit)
            .await?;
        info!(branch = %plan.branch, commit = %commit, files = overlay.len(), "branch updated");

        report.forced_without_lease = self.push(plan.remote, &plan.branch, plan.on_stale).await?;
        report.commit = Some(commit);
        Ok(report)
    }

    /// Baseline tree plus overlay, committed with the baseline as sole parent.
    async fn build_commit(
        &self,
        index_name: &str,
        baseline: &str,
        overlay: &[(String, TreeEntry)],
        message: &str,
    ) -> Result<String, PublishError> {
        let index = TempIndex::create(self.git_dir.join(index_name))?;
        self.repo.read_tree(&index, baseline).await?;
        for (path, entry) in overlay {
            self.repo.update_index_cacheinfo(&index, entry, path).await?;
        }
        let tree = self.repo.write_tree(&index).await?;
        index.remove();

        let commit = self.repo.commit_tree(&tree, baseline, message).await?;
        debug!(tree = %tree, commit = %commit, "built commit");
        Ok(commit)
    }

    /// Fetch the remote branch for the lease, then push. Returns `true` if
    /// a stale lease was overridden.
    async fn push(&self, remote: &str, branch: &str, on_stale: OnStaleLease) -> Result<bool, PublishError> {
        let expected = if self.repo.fetch_if_exists(remote, branch).await? {
            Some(
                self.repo
                    .rev_parse(&format!("refs/remotes/{remote}/{branch}"))
                    .await?,
            )
        } else {
            None
        };

        match self
            .repo
            .push_with_lease(remote, branch, expected.as_deref())
            .await?
        {
            PushOutcome::Pushed => Ok(false),
            PushOutcome::StaleLease => match on_stale {
                OnStaleLease::ForcePush => {
                    warn!(remote, branch, "lease stale; force-pushing fork-owned branch");
                    self.repo.push_force(remote, branch).await?;
                    Ok(true)
                }
                OnStaleLease::Fail => Err(PublishError::StaleLease {
                    remote: remote.to_string(),
                    branch: branch.to_string(),
                }),
            },
        }
    }

    /// Write the on-disk file at `rel_path` as an object. The inner `Err`
    /// rejects just this file.
    async fn stage_from_disk(&self, rel_path: &str) -> Result<Result<TreeEntry, SkipReason>, PublishError> {
        let full = match self.resolve_on_disk(rel_path).await? {
            Ok(full) => full,
            Err(reason) => return Ok(Err(reason)),
        };
        let metadata = tokio::fs::metadata(&full).await?;
        let oid = self.repo.hash_object_write(&full, rel_path).await?;
        Ok(Ok(TreeEntry::new(file_mode(&metadata), oid)))
    }

    async fn resolve_on_disk(&self, rel_path: &str) -> Result<Result<PathBuf, SkipReason>, PublishError> {
        if let Err(reason) = check_relative(rel_path) {
            return Ok(Err(reason));
        }
        let full = self.repo_root.join(rel_path);
        let metadata = match tokio::fs::symlink_metadata(&full).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Err(SkipReason::Missing)),
            Err(e) => return Err(PublishError::IoError(e)),
        };
        if metadata.file_type().is_symlink() {
            return Ok(Err(SkipReason::Symlink));
        }
        if !metadata.is_file() {
            return Ok(Err(SkipReason::NotAFile));
        }
        // A symlinked parent directory can still lead outside the root.
        let canonical = tokio::fs::canonicalize(&full).await?;
        if !canonical.starts_with(&self.repo_root) {
            return Ok(Err(SkipReason::PathEscape));
        }
        Ok(Ok(canonical))
    }
}

struct PublishPlan<'a> {
    branch: String,
    remote: &'a str,
    baseline: &'a str,
    index_name: &'a str,
    message: String,
    on_stale: OnStaleLease,
}

/// Reject paths that are empty, absolute, climb with `..`, or that git
/// refuses to index (`.git` components, `.` or empty segments).
fn check_relative(rel_path: &str) -> Result<(), SkipReason> {
    if rel_path.is_empty() {
        return Err(SkipReason::Missing);
    }
    let escapes = Path::new(rel_path)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(SkipReason::PathEscape);
    }
    let invalid = rel_path
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg.eq_ignore_ascii_case(".git"));
    if invalid {
        return Err(SkipReason::InvalidPath);
    }
    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> &'static str {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o111 != 0 {
        "100755"
    } else {
        "100644"
    }
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> &'static str {
    "100644"
}

fn short(sha: &str) -> &str {
    &sha[..sha.len().min(12)]
}
