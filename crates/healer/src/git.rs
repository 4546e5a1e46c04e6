//! Git working tree snapshot

use crate::error::{HealerError, HealerResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Output};
use tracing::debug;

/// Git repository status for Healer context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GitStatus {
    /// Whether the repo has uncommitted changes
    pub is_dirty: bool,
    pub modified_files: Vec<String>,
    pub untracked_files: Vec<String>,
    pub current_branch: String,
    pub last_commit_sha: String,
    pub last_commit_message: String,
}

impl GitStatus {
    /// A clean tree with no further detail
    pub fn clean() -> Self {
        Self::default()
    }

    /// Build a status from `git status --porcelain` output
    pub fn from_porcelain(porcelain: &str) -> Self {
        let mut status = Self::default();
        for line in porcelain.lines() {
            if line.len() < 4 {
                continue;
            }
            let (code, path) = line.split_at(3);
            let path = match path.split_once(" -> ") {
                Some((_, renamed)) => renamed,
                None => path,
            };
            if code.starts_with("??") {
                status.untracked_files.push(path.to_string());
            } else {
                status.modified_files.push(path.to_string());
            }
        }
        status.is_dirty = !status.modified_files.is_empty() || !status.untracked_files.is_empty();
        status
    }

    /// Snapshot the working tree at `root`.
    ///
    /// Fails when `root` is not inside a git work tree. Branch and last
    /// commit are left empty for a repository without commits.
    pub fn capture(root: impl AsRef<Path>) -> HealerResult<Self> {
        let root = root.as_ref();
        debug!(root = %root.display(), "Capturing git status");

        let output = run_git(root, &["status", "--porcelain"])?;
        if !output.status.success() {
            return Err(HealerError::git(format!(
                "git status failed in {}: {}",
                root.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let mut status = Self::from_porcelain(&String::from_utf8_lossy(&output.stdout));

        status.current_branch = git_stdout(root, &["branch", "--show-current"]).unwrap_or_default();
        status.last_commit_sha = git_stdout(root, &["log", "-1", "--format=%H"]).unwrap_or_default();
        status.last_commit_message =
            git_stdout(root, &["log", "-1", "--format=%s"]).unwrap_or_default();

        Ok(status)
    }

    pub fn changed_file_count(&self) -> usize {
        self.modified_files.len() + self.untracked_files.len()
    }
}

/// Run a git subcommand in `root`, capturing output
pub(crate) fn run_git(root: &Path, args: &[&str]) -> HealerResult<Output> {
    Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .map_err(|e| HealerError::git(format!("failed to run git {}: {}", args.join(" "), e)))
}

fn git_stdout(root: &Path, args: &[&str]) -> Option<String> {
    run_git(root, args)
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
