//! Override policy: which paths stay fork-owned and which are never synced.
//!
//! Provides [`OverridePolicy`] which holds the `ignored` and `pinned` pattern
//! lists from the `[overrides]` config section.
//!
//! # Matching model
//!
//! | Pattern | Matches |
//! |---------|---------|
//! | no wildcard characters | the exact path only |
//! | `*` | any run of characters within one path segment |
//! | `**` | zero or more whole path segments |
//!
//! Paths are compared as given. They must already be repository-relative
//! with forward slashes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Characters that make a pattern a glob rather than an exact path.
const WILDCARD_CHARS: &[char] = &['*', '?', '[', '{'];

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Ignored and pinned pattern lists, read-only for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverridePolicy {
    /// Paths excluded from sync in both directions.
    #[serde(default)]
    pub ignored: Vec<String>,
    /// Paths where the fork always wins. Should be exact paths.
    #[serde(default)]
    pub pinned: Vec<String>,
}

impl OverridePolicy {
    pub fn new(ignored: Vec<String>, pinned: Vec<String>) -> Self {
        Self { ignored, pinned }
    }

    /// `true` if `path` matches any ignored pattern.
    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored.iter().any(|pattern| {
            let hit = matches_pattern(pattern, path);
            if hit {
                debug!(path, pattern = pattern.as_str(), "path matches ignored pattern");
            }
            hit
        })
    }

    /// `true` if `path` matches any pinned pattern.
    pub fn is_pinned(&self, path: &str) -> bool {
        self.pinned.iter().any(|pattern| matches_pattern(pattern, path))
    }

    /// Whether the policy has any patterns at all.
    pub fn is_empty(&self) -> bool {
        self.ignored.is_empty() && self.pinned.is_empty()
    }

    /// Check the patterns against the paths present in the fork.
    ///
    /// Warnings never block a sync.
    pub fn validate<'a, I>(&self, fork_paths: I) -> Vec<PolicyWarning>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let fork_paths: BTreeSet<&str> = fork_paths.into_iter().collect();
        let mut warnings = Vec::new();

        for pattern in &self.pinned {
            if has_wildcard(pattern) {
                warnings.push(PolicyWarning::PinnedGlob {
                    pattern: pattern.clone(),
                });
            } else if !fork_paths.contains(pattern.as_str()) {
                warnings.push(PolicyWarning::PinnedMissing {
                    pattern: pattern.clone(),
                });
            }
        }

        for pattern in &self.ignored {
            let Some(dir) = pattern.strip_suffix("/*") else {
                continue;
            };
            if dir.ends_with('*') {
                continue;
            }
            let prefix = format!("{dir}/");
            let has_nested = fork_paths.iter().any(|p| {
                p.strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.contains('/'))
            });
            if has_nested {
                warnings.push(PolicyWarning::ShallowIgnore {
                    pattern: pattern.clone(),
                    suggestion: format!("{dir}/**"),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A non-fatal problem with the configured patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyWarning {
    /// Pinned patterns must be exact paths.
    PinnedGlob { pattern: String },
    /// No file in the fork has this pinned path.
    PinnedMissing { pattern: String },
    /// `dir/*` skips nested directories; `dir/**` was probably meant.
    ShallowIgnore { pattern: String, suggestion: String },
}

impl std::fmt::Display for PolicyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PinnedGlob { pattern } => {
                write!(f, "pinned pattern '{pattern}' contains wildcards; pins must be exact paths")
            }
            Self::PinnedMissing { pattern } => {
                write!(f, "pinned path '{pattern}' does not exist in the fork")
            }
            Self::ShallowIgnore { pattern, suggestion } => write!(
                f,
                "ignored pattern '{pattern}' only matches one directory level; did you mean '{suggestion}'?"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Pattern matching
// ---------------------------------------------------------------------------

/// Whether `pattern` uses glob syntax rather than naming one path.
pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(WILDCARD_CHARS)
}

/// Test whether `path` matches `pattern`.
fn matches_pattern(pattern: &str, path: &str) -> bool {
    if has_wildcard(pattern) {
        glob_match::glob_match(pattern, path)
    } else {
        pattern == path
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
