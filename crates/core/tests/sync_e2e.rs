//! End-to-end tests for fork synchronization against real git repositories.
//!
//! Each test builds a throwaway upstream repository, clones it as the fork,
//! and drives a `SyncSession` against the clone. Review branches are pushed
//! to a local bare repository and inspected with `git2`.
//!
//! No network I/O: every remote is a local path.
//!
//! Tests skip gracefully if `git` is not installed.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::TempDir;

use forksync_core::config::MergeStrategy;
use forksync_core::errors::{PublishError, SyncError, WorktreeError};
use forksync_core::git::GitCli;
use forksync_core::worktree::IsolationManager;
use forksync_core::models::{FileStatus, MergeResult};
use forksync_core::publish::{contrib_branch, SkipReason, PINNED_BRANCH};
use forksync_core::{ForkSyncConfig, OverridePolicy, SessionMode, SyncSession};

// ===========================================================================
// Helpers
// ===========================================================================

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args([
            "-c",
            "user.name=Fork Tester",
            "-c",
            "user.email=tester@example.com",
            "-c",
            "commit.gpgsign=false",
            "-c",
            "init.defaultBranch=main",
        ])
        .args(args)
        .env("LC_ALL", "C")
        .env_remove("GIT_INDEX_FILE")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn write(repo: &Path, rel: &str, content: &str) {
    let path = repo.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn read(repo: &Path, rel: &str) -> String {
    std::fs::read_to_string(repo.join(rel)).unwrap()
}

fn commit_all(repo: &Path, message: &str) {
    git(repo, &["add", "-A"]);
    git(repo, &["commit", "-q", "-m", message]);
}

struct Fixture {
    tmp: TempDir,
    upstream: PathBuf,
    fork: PathBuf,
}

impl Fixture {
    /// Upstream with one commit of `files`, cloned as the fork.
    fn new(files: &[(&str, &str)]) -> Self {
        let tmp = TempDir::new().unwrap();
        let upstream = tmp.path().join("upstream");
        let fork = tmp.path().join("fork");
        std::fs::create_dir_all(&upstream).unwrap();

        git(&upstream, &["init", "-q", "-b", "main"]);
        for (path, content) in files {
            write(&upstream, path, content);
        }
        commit_all(&upstream, "initial");

        git(
            tmp.path(),
            &["clone", "-q", upstream.to_str().unwrap(), fork.to_str().unwrap()],
        );
        git(&fork, &["config", "user.name", "Fork Tester"]);
        git(&fork, &["config", "user.email", "tester@example.com"]);
        git(&fork, &["config", "commit.gpgsign", "false"]);

        Self {
            tmp,
            upstream,
            fork,
        }
    }

    fn worktree_root(&self) -> PathBuf {
        self.tmp.path().join("worktrees")
    }

    fn config(&self, ignored: &[&str], pinned: &[&str]) -> ForkSyncConfig {
        let mut config = ForkSyncConfig::with_upstream(self.upstream.to_str().unwrap());
        config.fork.name = Some("acme".into());
        config.overrides = OverridePolicy::new(
            ignored.iter().map(|s| s.to_string()).collect(),
            pinned.iter().map(|s| s.to_string()).collect(),
        );
        config.session.worktree_root = Some(self.worktree_root());
        config
    }

    fn session(&self, ignored: &[&str], pinned: &[&str]) -> SyncSession {
        SyncSession::new(&self.fork, self.config(ignored, pinned))
    }

    /// A bare repository registered in the fork as remote `review`.
    fn review_remote(&self) -> PathBuf {
        let bare = self.tmp.path().join("review.git");
        git(
            self.tmp.path(),
            &["init", "-q", "--bare", bare.to_str().unwrap()],
        );
        git(&self.fork, &["remote", "add", "review", bare.to_str().unwrap()]);
        bare
    }

    fn worktree_root_is_empty(&self) -> bool {
        match std::fs::read_dir(self.worktree_root()) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }
}

fn status_of(result: &MergeResult, path: &str) -> FileStatus {
    result
        .files
        .iter()
        .find(|r| r.path == path)
        .unwrap_or_else(|| panic!("no record for {path}"))
        .status
}

fn blob_at(repo: &git2::Repository, branch: &str, path: &str) -> Option<String> {
    let commit = repo
        .find_reference(&format!("refs/heads/{branch}"))
        .unwrap()
        .peel_to_commit()
        .unwrap();
    let entry = commit.tree().unwrap().get_path(Path::new(path)).ok()?;
    let blob = entry.to_object(repo).unwrap().peel_to_blob().unwrap();
    Some(String::from_utf8_lossy(blob.content()).to_string())
}

// ===========================================================================
// Sync scenarios
// ===========================================================================

#[tokio::test]
async fn test_upstream_addition_is_behind_and_applied() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("README.md", "hello\n")]);
    write(&fx.upstream, "feature.ts", "export const feature = 1;\n");
    commit_all(&fx.upstream, "add feature");

    let session = fx.session(&[], &[]);
    let preview = session.run(SessionMode::DryRun).await.unwrap();
    assert!(preview.dry_run);
    assert_eq!(status_of(&preview, "feature.ts"), FileStatus::Behind);
    assert!(preview.success);
    assert!(!fx.fork.join("feature.ts").exists());

    let applied = session.run(SessionMode::Apply).await.unwrap();
    assert!(applied.success);
    assert_eq!(status_of(&applied, "feature.ts"), FileStatus::Behind);
    assert_eq!(read(&fx.fork, "feature.ts"), "export const feature = 1;\n");
}

#[tokio::test]
async fn test_diverged_file_takes_merge_output() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("shared.ts", "one\ntwo\nthree\nfour\nfive\n")]);
    write(&fx.fork, "shared.ts", "ONE\ntwo\nthree\nfour\nfive\n");
    commit_all(&fx.fork, "fork edit");
    write(&fx.upstream, "shared.ts", "one\ntwo\nthree\nfour\nFIVE\n");
    commit_all(&fx.upstream, "upstream edit");

    let result = fx.session(&[], &[]).run(SessionMode::Apply).await.unwrap();
    assert_eq!(status_of(&result, "shared.ts"), FileStatus::Diverged);
    assert!(result.success);
    assert_eq!(read(&fx.fork, "shared.ts"), "ONE\ntwo\nthree\nfour\nFIVE\n");
}

#[tokio::test]
async fn test_pinned_file_keeps_fork_version_through_conflict() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("backend/index.ts", "port = 80\n")]);
    write(&fx.fork, "backend/index.ts", "port = 8080\n");
    commit_all(&fx.fork, "fork port");
    write(&fx.upstream, "backend/index.ts", "port = 443\n");
    commit_all(&fx.upstream, "upstream port");

    let result = fx
        .session(&[], &["backend/index.ts"])
        .run(SessionMode::Apply)
        .await
        .unwrap();
    assert_eq!(status_of(&result, "backend/index.ts"), FileStatus::Pinned);
    assert!(result.success, "unresolved: {:?}", result.conflicts);
    assert!(result.auto_resolved >= 1);
    assert_eq!(read(&fx.fork, "backend/index.ts"), "port = 8080\n");
}

#[tokio::test]
async fn test_ignored_addition_never_materializes() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("README.md", "hello\n")]);
    write(&fx.upstream, "docs/guide.md", "# Guide\n");
    commit_all(&fx.upstream, "add docs");

    let result = fx
        .session(&["docs/**"], &[])
        .run(SessionMode::Apply)
        .await
        .unwrap();
    assert_eq!(status_of(&result, "docs/guide.md"), FileStatus::Ignored);
    assert!(result.success);
    assert!(!fx.fork.join("docs/guide.md").exists());
}

#[tokio::test]
async fn test_upstream_deletion_is_applied() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("README.md", "hello\n"), ("legacy.js", "old\n")]);
    git(&fx.upstream, &["rm", "-q", "legacy.js"]);
    commit_all(&fx.upstream, "drop legacy");

    let result = fx.session(&[], &[]).run(SessionMode::Apply).await.unwrap();
    assert_eq!(status_of(&result, "legacy.js"), FileStatus::Behind);
    assert!(result.success);
    assert!(!fx.fork.join("legacy.js").exists());
}

#[tokio::test]
async fn test_dry_run_leaves_fork_and_worktrees_untouched() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("shared.ts", "value = 1\n"), ("notes.md", "n\n")]);
    write(&fx.fork, "shared.ts", "value = 2\n");
    commit_all(&fx.fork, "fork value");
    write(&fx.upstream, "shared.ts", "value = 3\n");
    write(&fx.upstream, "notes.md", "upstream notes\n");
    commit_all(&fx.upstream, "upstream value");

    let head_before = git(&fx.fork, &["rev-parse", "HEAD"]);
    let result = fx
        .session(&[], &["notes.md"])
        .run(SessionMode::DryRun)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.conflicts, vec!["shared.ts".to_string()]);
    let shared = result.files.iter().find(|r| r.path == "shared.ts").unwrap();
    assert_eq!(shared.has_conflict, Some(true));
    assert!(shared.fork_change.is_some());
    assert!(shared.upstream_change.is_some());

    assert_eq!(git(&fx.fork, &["rev-parse", "HEAD"]), head_before);
    assert_eq!(git(&fx.fork, &["status", "--porcelain"]), "");
    assert!(!fx.fork.join(".git/MERGE_HEAD").exists());
    assert_eq!(git(&fx.fork, &["worktree", "list"]).lines().count(), 1);
    assert!(fx.worktree_root_is_empty());
}

#[tokio::test]
async fn test_dry_run_agrees_with_apply_on_modify_delete() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("README.md", "hello\n"), ("a.ts", "a1\n"), ("b.ts", "b1\n")]);
    // Fork edits a.ts and deletes b.ts; upstream does the reverse.
    write(&fx.fork, "a.ts", "a fork\n");
    git(&fx.fork, &["rm", "-q", "b.ts"]);
    commit_all(&fx.fork, "fork edits");
    git(&fx.upstream, &["rm", "-q", "a.ts"]);
    write(&fx.upstream, "b.ts", "b upstream\n");
    commit_all(&fx.upstream, "upstream edits");

    let session = fx.session(&[], &[]);
    let preview = session.run(SessionMode::DryRun).await.unwrap();
    assert_eq!(status_of(&preview, "a.ts"), FileStatus::Behind);
    assert_eq!(status_of(&preview, "b.ts"), FileStatus::Behind);
    let mut conflicted: Vec<&str> = preview
        .files
        .iter()
        .filter(|r| r.has_conflict == Some(true))
        .map(|r| r.path.as_str())
        .collect();
    conflicted.sort_unstable();
    assert_eq!(conflicted, vec!["a.ts", "b.ts"]);
    assert!(preview.conflicts.is_empty(), "{:?}", preview.conflicts);
    assert!(preview.success);

    let applied = session.run(SessionMode::Apply).await.unwrap();
    assert_eq!(applied.conflicts, preview.conflicts);
    assert_eq!(applied.success, preview.success);
    assert!(!fx.fork.join("a.ts").exists());
    assert_eq!(read(&fx.fork, "b.ts"), "b upstream\n");
}

#[tokio::test]
async fn test_squash_apply_stages_upstream_without_merge_state() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("README.md", "hello\n")]);
    write(&fx.upstream, "feature.ts", "squashed\n");
    commit_all(&fx.upstream, "add feature");

    let mut config = fx.config(&[], &[]);
    config.merge.strategy = MergeStrategy::Squash;
    let head_before = git(&fx.fork, &["rev-parse", "HEAD"]);
    let result = SyncSession::new(&fx.fork, config)
        .run(SessionMode::Apply)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(status_of(&result, "feature.ts"), FileStatus::Behind);
    assert_eq!(read(&fx.fork, "feature.ts"), "squashed\n");
    assert_eq!(git(&fx.fork, &["rev-parse", "HEAD"]), head_before);
    assert!(!fx.fork.join(".git/MERGE_HEAD").exists());
    assert!(git(&fx.fork, &["diff", "--cached", "--name-only"]).contains("feature.ts"));
}

#[tokio::test]
async fn test_unrelated_histories_have_no_merge_base() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("README.md", "hello\n")]);
    let other = fx.tmp.path().join("other");
    std::fs::create_dir_all(&other).unwrap();
    git(&other, &["init", "-q", "-b", "main"]);
    write(&other, "unrelated.txt", "x\n");
    commit_all(&other, "unrelated root");

    let config = ForkSyncConfig::with_upstream(other.to_str().unwrap());
    let err = SyncSession::new(&fx.fork, config)
        .run(SessionMode::DryRun)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NoMergeBase { .. }), "got {err:?}");
}

// ===========================================================================
// Review branches
// ===========================================================================

#[tokio::test]
async fn test_contribution_branch_is_upstream_plus_drifted_files() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("src/app.ts", "v1\n"), ("README.md", "hello\n")]);
    let review = fx.review_remote();
    write(&fx.fork, "src/app.ts", "fork fix\n");
    commit_all(&fx.fork, "fork fix");
    write(&fx.upstream, "CHANGELOG.md", "upstream\n");
    commit_all(&fx.upstream, "changelog");

    let mut config = fx.config(&[], &[]);
    config.publish.contrib_remote = Some("review".into());
    let session = SyncSession::new(&fx.fork, config);

    let head_before = git(&fx.fork, &["rev-parse", "HEAD"]);
    let report = session.contribute(None).await.unwrap();
    assert!(report.success());
    assert_eq!(report.branch, contrib_branch("acme"));
    assert_eq!(report.published, 1);
    assert!(report.skipped.is_empty());

    let bare = git2::Repository::open_bare(&review).unwrap();
    assert_eq!(
        blob_at(&bare, "contrib/acme", "src/app.ts").as_deref(),
        Some("fork fix\n")
    );
    assert_eq!(
        blob_at(&bare, "contrib/acme", "CHANGELOG.md").as_deref(),
        Some("upstream\n")
    );
    let commit = bare
        .find_reference("refs/heads/contrib/acme")
        .unwrap()
        .peel_to_commit()
        .unwrap();
    let upstream_tip = git(&fx.upstream, &["rev-parse", "HEAD"]);
    assert_eq!(commit.parent_id(0).unwrap().to_string(), upstream_tip.trim());

    assert_eq!(git(&fx.fork, &["rev-parse", "HEAD"]), head_before);
    assert_eq!(git(&fx.fork, &["status", "--porcelain"]), "");
}

#[tokio::test]
async fn test_contribution_skips_unsafe_paths() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("src/app.ts", "v1\n")]);
    fx.review_remote();
    write(&fx.fork, "src/app.ts", "local edit\n");

    let mut config = fx.config(&[], &[]);
    config.publish.contrib_remote = Some("review".into());
    let report = SyncSession::new(&fx.fork, config)
        .contribute(Some(vec![
            "src/app.ts".into(),
            "../outside.txt".into(),
            "missing.txt".into(),
            ".git/config".into(),
            "./src/app.ts".into(),
        ]))
        .await
        .unwrap();

    assert!(report.success());
    assert_eq!(report.published, 1);
    let skipped: Vec<(&str, SkipReason)> = report
        .skipped
        .iter()
        .map(|s| (s.path.as_str(), s.reason))
        .collect();
    assert_eq!(
        skipped,
        vec![
            ("../outside.txt", SkipReason::PathEscape),
            ("missing.txt", SkipReason::Missing),
            (".git/config", SkipReason::InvalidPath),
            ("./src/app.ts", SkipReason::InvalidPath),
        ]
    );
    // Uncommitted edits are published but stay uncommitted locally.
    assert_eq!(read(&fx.fork, "src/app.ts"), "local edit\n");
    assert!(git(&fx.fork, &["status", "--porcelain"]).contains("src/app.ts"));
}

#[tokio::test]
async fn test_contribution_without_drift_has_nothing_to_publish() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("README.md", "hello\n")]);
    fx.review_remote();
    let mut config = fx.config(&[], &[]);
    config.publish.contrib_remote = Some("review".into());

    let err = SyncSession::new(&fx.fork, config)
        .contribute(None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, SyncError::PublishError(PublishError::NothingToPublish(_))),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_pinned_branch_overlays_upstream_versions() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("config.json", "{\"a\":1}\n"), ("app.ts", "app\n")]);
    let review = fx.review_remote();
    write(&fx.fork, "config.json", "{\"a\":2}\n");
    write(&fx.fork, "app.ts", "fork app\n");
    commit_all(&fx.fork, "fork config");
    write(&fx.upstream, "config.json", "{\"a\":3}\n");
    commit_all(&fx.upstream, "upstream config");

    let mut config = fx.config(&[], &["config.json", "gone.json"]);
    config.publish.pinned_remote = Some("review".into());
    let session = SyncSession::new(&fx.fork, config);

    let report = session.publish_pinned().await.unwrap();
    assert!(report.success());
    assert_eq!(report.branch, PINNED_BRANCH);
    assert_eq!(report.published, 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].path, "gone.json");

    let bare = git2::Repository::open_bare(&review).unwrap();
    assert_eq!(
        blob_at(&bare, PINNED_BRANCH, "config.json").as_deref(),
        Some("{\"a\":3}\n")
    );
    assert_eq!(
        blob_at(&bare, PINNED_BRANCH, "app.ts").as_deref(),
        Some("fork app\n")
    );
    assert_eq!(read(&fx.fork, "config.json"), "{\"a\":2}\n");

    // Publishing again on top of the existing remote branch succeeds.
    let again = session.publish_pinned().await.unwrap();
    assert!(again.success());
    assert!(!again.forced_without_lease);
}

#[tokio::test]
async fn test_validate_policy_reports_missing_pins() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("README.md", "hello\n")]);
    let warnings = fx
        .session(&[], &["nope.txt"])
        .validate_policy()
        .await
        .unwrap();
    assert_eq!(warnings.len(), 1);
}

// ===========================================================================
// Worktree isolation
// ===========================================================================

/// Fork whose `origin/main` conflicts with `HEAD` on `shared.ts`.
fn conflicting_fixture() -> Fixture {
    let fx = Fixture::new(&[("shared.ts", "value = 1\n")]);
    write(&fx.fork, "shared.ts", "value = 2\n");
    commit_all(&fx.fork, "fork value");
    write(&fx.upstream, "shared.ts", "value = 3\n");
    commit_all(&fx.upstream, "upstream value");
    git(&fx.fork, &["fetch", "-q", "origin"]);
    fx
}

fn toplevel(repo: &Path) -> PathBuf {
    PathBuf::from(git(repo, &["rev-parse", "--show-toplevel"]).trim())
}

fn assert_no_worktree(fx: &Fixture, path: &Path) {
    assert!(!path.exists(), "{} still exists", path.display());
    assert_eq!(git(&fx.fork, &["worktree", "list"]).lines().count(), 1);
    assert!(!fx.fork.join(".git/MERGE_HEAD").exists());
    assert_eq!(git(&fx.fork, &["status", "--porcelain"]), "");
}

#[tokio::test]
async fn test_interrupt_aborts_merge_and_removes_registered_worktree() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = conflicting_fixture();
    let manager = IsolationManager::new(GitCli::new(&fx.fork), fx.worktree_root());
    let handle = manager.interrupt_handle();

    let worktree = manager.acquire("HEAD").await.unwrap();
    let path = worktree.path().to_path_buf();
    let outcome = worktree
        .git()
        .merge("origin/main", MergeStrategy::Merge)
        .await
        .unwrap();
    assert!(outcome.conflicts().contains("shared.ts"));
    git(&path, &["rev-parse", "-q", "--verify", "MERGE_HEAD"]);
    assert_eq!(manager.active_path(), Some(path.clone()));

    assert!(handle.abort_and_remove().await.unwrap());
    assert!(manager.active_path().is_none());
    assert_no_worktree(&fx, &path);

    // The handle no longer owns anything; dropping it is a no-op.
    drop(worktree);
    assert!(!handle.abort_and_remove().await.unwrap());
}

#[tokio::test]
async fn test_dropped_worktree_is_cleaned_up() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = conflicting_fixture();
    let manager = IsolationManager::new(GitCli::new(&fx.fork), fx.worktree_root());

    let worktree = manager.acquire("HEAD").await.unwrap();
    let path = worktree.path().to_path_buf();
    worktree
        .git()
        .merge("origin/main", MergeStrategy::Merge)
        .await
        .unwrap();
    drop(worktree);

    assert!(manager.active_path().is_none());
    assert_no_worktree(&fx, &path);
    assert!(fx.worktree_root_is_empty());

    // A fresh acquire works after the drop.
    let again = manager.acquire("HEAD").await.unwrap();
    again.release().await.unwrap();
}

#[tokio::test]
async fn test_acquire_replaces_leftover_directory() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("README.md", "hello\n")]);
    let manager = IsolationManager::new(GitCli::new(&fx.fork), fx.worktree_root());
    let leftover = manager.worktree_path(&toplevel(&fx.fork));
    std::fs::create_dir_all(&leftover).unwrap();
    std::fs::write(leftover.join("junk.txt"), "from a crashed run\n").unwrap();

    let worktree = manager.acquire("HEAD").await.unwrap();
    assert_eq!(worktree.path(), leftover.as_path());
    assert!(!leftover.join("junk.txt").exists());
    assert_eq!(read(&leftover, "README.md"), "hello\n");

    worktree.release().await.unwrap();
    assert_no_worktree(&fx, &leftover);
}

#[tokio::test]
async fn test_second_acquire_is_rejected_while_registered() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("README.md", "hello\n")]);
    let manager = IsolationManager::new(GitCli::new(&fx.fork), fx.worktree_root());

    let worktree = manager.acquire("HEAD").await.unwrap();
    let err = manager.acquire("HEAD").await.unwrap_err();
    assert!(matches!(err, WorktreeError::AlreadyRegistered(_)), "got {err:?}");
    worktree.release().await.unwrap();
}

#[tokio::test]
async fn test_worktree_root_inside_fork_is_rejected() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fx = Fixture::new(&[("README.md", "hello\n")]);
    let inside = toplevel(&fx.fork).join("wt");
    let manager = IsolationManager::new(GitCli::new(&fx.fork), &inside);

    let err = manager.acquire("HEAD").await.unwrap_err();
    assert!(matches!(err, WorktreeError::CreateFailed { .. }), "got {err:?}");
    assert!(!inside.exists());
    assert_eq!(git(&fx.fork, &["worktree", "list"]).lines().count(), 1);
}
