//! TOML-based configuration for forksync.
//!
//! A fork keeps its settings in `forksync.toml` at the repository root. Only
//! `[upstream] url` is required; everything else has a default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::overrides::OverridePolicy;

/// File name looked up at the fork root.
pub const CONFIG_FILE_NAME: &str = "forksync.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from `forksync.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkSyncConfig {
    /// Upstream template repository.
    pub upstream: UpstreamConfig,

    /// The fork itself.
    #[serde(default)]
    pub fork: ForkConfig,

    /// Merge behaviour.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Ignored and pinned paths.
    #[serde(default)]
    pub overrides: OverridePolicy,

    /// Review-branch publishing.
    #[serde(default)]
    pub publish: PublishConfig,

    /// Per-invocation behaviour.
    #[serde(default)]
    pub session: SessionConfig,
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

/// Upstream repository settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Clone URL of the upstream repository.
    pub url: String,

    /// Upstream branch to sync from. Default `main`.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Name of the git remote pointing at upstream. Default `upstream`.
    #[serde(default = "default_upstream_remote")]
    pub remote: String,

    /// A local clone of upstream to fetch from instead of `url`.
    #[serde(default)]
    pub local_path: Option<PathBuf>,
}

impl UpstreamConfig {
    /// `remote/branch`, the ref every comparison is made against.
    pub fn tracking_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }

    /// The URL the remote should point at.
    pub fn fetch_url(&self) -> String {
        match &self.local_path {
            Some(path) => path.display().to_string(),
            None => self.url.clone(),
        }
    }
}

fn default_branch() -> String {
    "main".into()
}
fn default_upstream_remote() -> String {
    "upstream".into()
}
fn default_fork_remote() -> String {
    "origin".into()
}

// ---------------------------------------------------------------------------
// Fork
// ---------------------------------------------------------------------------

/// Fork settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkConfig {
    /// Fork branch being kept in sync. Default `main`.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Name used in `contrib/<name>`. Defaults to the fork directory name.
    #[serde(default)]
    pub name: Option<String>,

    /// Remote of the fork itself. Default `origin`.
    #[serde(default = "default_fork_remote")]
    pub remote: String,
}

impl Default for ForkConfig {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            name: None,
            remote: default_fork_remote(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// How upstream is brought into the fork.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// A regular merge (records upstream as a parent once committed).
    #[default]
    Merge,
    /// Squash upstream's changes into one pending change.
    Squash,
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merge => write!(f, "merge"),
            Self::Squash => write!(f, "squash"),
        }
    }
}

/// Merge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub strategy: MergeStrategy,
}

// ---------------------------------------------------------------------------
// Publish
// ---------------------------------------------------------------------------

/// Where review branches are pushed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Remote for `contrib/<fork-name>`. Defaults to the upstream remote.
    #[serde(default)]
    pub contrib_remote: Option<String>,

    /// Remote for `upstream/pinned`. Defaults to the fork remote.
    #[serde(default)]
    pub pinned_remote: Option<String>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Per-invocation behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Parent directory for preview worktrees. Absolute, outside the fork.
    #[serde(default)]
    pub worktree_root: Option<PathBuf>,

    /// Look up last-change commits for changed files.
    #[serde(default = "default_true")]
    pub provenance: bool,
}

fn default_log_level() -> String {
    "warn".into()
}
fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            worktree_root: None,
            provenance: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl ForkSyncConfig {
    /// Build a config with defaults for everything but the upstream URL.
    pub fn with_upstream(url: impl Into<String>) -> Self {
        Self {
            upstream: UpstreamConfig {
                url: url.into(),
                branch: default_branch(),
                remote: default_upstream_remote(),
                local_path: None,
            },
            fork: ForkConfig::default(),
            merge: MergeConfig::default(),
            overrides: OverridePolicy::default(),
            publish: PublishConfig::default(),
            session: SessionConfig::default(),
        }
    }

    /// Load a [`ForkSyncConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load `forksync.toml` from a fork root.
    pub fn load_from_fork(fork_root: &Path) -> Result<Self, ConfigError> {
        Self::load_from_file(fork_root.join(CONFIG_FILE_NAME))
    }

    /// Parse and validate a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        debug!(upstream = %config.upstream.url, "configuration parsed");
        Ok(config)
    }

    /// Validate that required fields are present and sensible.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.url.trim().is_empty() && self.upstream.local_path.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "upstream.url".into(),
                detail: "must not be empty".into(),
            });
        }
        require_non_empty("upstream.branch", &self.upstream.branch)?;
        require_non_empty("fork.branch", &self.fork.branch)?;
        validate_remote_name("upstream.remote", &self.upstream.remote)?;
        validate_remote_name("fork.remote", &self.fork.remote)?;
        if let Some(remote) = &self.publish.contrib_remote {
            validate_remote_name("publish.contrib_remote", remote)?;
        }
        if let Some(remote) = &self.publish.pinned_remote {
            validate_remote_name("publish.pinned_remote", remote)?;
        }
        if let Some(name) = &self.fork.name {
            require_non_empty("fork.name", name)?;
        }
        if let Some(root) = &self.session.worktree_root {
            if !root.is_absolute() {
                return Err(ConfigError::InvalidValue {
                    field: "session.worktree_root".into(),
                    detail: format!("'{}' must be an absolute path", root.display()),
                });
            }
        }
        Ok(())
    }

    /// Remote that receives the contribution branch.
    pub fn contrib_remote(&self) -> &str {
        self.publish
            .contrib_remote
            .as_deref()
            .unwrap_or(&self.upstream.remote)
    }

    /// Remote that receives the pinned-overlay branch.
    pub fn pinned_remote(&self) -> &str {
        self.publish
            .pinned_remote
            .as_deref()
            .unwrap_or(&self.fork.remote)
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: field.into(),
            detail: "must not be empty".into(),
        });
    }
    Ok(())
}

fn validate_remote_name(field: &str, value: &str) -> Result<(), ConfigError> {
    require_non_empty(field, value)?;
    if value.contains(char::is_whitespace) || value.contains('/') {
        return Err(ConfigError::InvalidValue {
            field: field.into(),
            detail: format!("'{value}' is not a valid remote name"),
        });
    }
    Ok(())
}
