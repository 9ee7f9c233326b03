//! Version fingerprint shared between master and slaves.
//!
//! Both sides capture the same small document at startup; the master
//! compares a slave's reported commit against its own to flag fleet
//! members running stale code.

use std::process::Command;

use serde::{Deserialize, Serialize};

/// Git branch, commit, and runtime version of a running process.
///
/// Fields default to `"unknown"` so a peer reporting a partial fingerprint
/// still deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionInfo {
    pub git_branch: String,
    pub git_commit: String,
    pub runtime_version: String,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            git_branch: "unknown".into(),
            git_commit: "unknown".into(),
            runtime_version: "unknown".into(),
        }
    }
}

impl VersionInfo {
    /// Capture the fingerprint of the current checkout.
    ///
    /// Environment overrides (`DROVER_GIT_COMMIT`, `DROVER_GIT_BRANCH`) win
    /// over `git` output so containerized deployments without a `.git`
    /// directory can still report their build.
    pub fn capture(runtime_version: &str) -> Self {
        let git_commit = std::env::var("DROVER_GIT_COMMIT")
            .ok()
            .or_else(|| git_output(&["rev-parse", "HEAD"]))
            .unwrap_or_else(|| "unknown".into());
        let git_branch = std::env::var("DROVER_GIT_BRANCH")
            .ok()
            .or_else(|| git_output(&["rev-parse", "--abbrev-ref", "HEAD"]))
            .unwrap_or_else(|| "unknown".into());

        Self {
            git_branch,
            git_commit,
            runtime_version: runtime_version.to_owned(),
        }
    }

    /// Whether `other` runs the same commit as `self`. Plain equality: a
    /// fleet where nobody can name a commit (all `unknown`) counts as in
    /// sync rather than grounding every dispatch.
    pub fn commit_matches(&self, other: &VersionInfo) -> bool {
        self.git_commit == other.git_commit
    }
}

fn git_output(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8(output.stdout).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn version(commit: &str) -> VersionInfo {
        VersionInfo {
            git_branch: "main".into(),
            git_commit: commit.into(),
            runtime_version: "0.4.2".into(),
        }
    }

    #[test]
    fn matching_commits_match() {
        assert!(version("abc123").commit_matches(&version("abc123")));
    }

    #[test]
    fn differing_commits_do_not_match() {
        assert!(!version("abc123").commit_matches(&version("def456")));
    }

    #[test]
    fn unknown_on_both_sides_matches() {
        assert!(version("unknown").commit_matches(&version("unknown")));
        assert!(!version("abc123").commit_matches(&version("unknown")));
    }

    #[test]
    fn serializes_with_snake_case_fields() {
        let json = serde_json::to_value(version("abc123")).unwrap();
        assert_eq!(json["git_commit"], "abc123");
        assert_eq!(json["git_branch"], "main");
        assert_eq!(json["runtime_version"], "0.4.2");
    }
}
