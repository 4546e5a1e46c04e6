use super::{HealerSpellId, HealerSpellResult, Spell};
use crate::config::OPENAGENTS_DIR;
use crate::context::HealerContext;
use crate::git::{GitStatus, run_git};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Discard uncommitted work: `git restore .` then `git clean -fd`.
/// Healer and orchestrator state under `.openagents/` is left alone.
///
/// The git sequence runs as one blocking unit on tokio's blocking pool.
/// Dropping the returned future does not stop it, so a started rewind always
/// runs to completion. Do not run it alongside another mutating git
/// operation on the same working tree.
pub struct RewindUncommittedChangesSpell;

#[async_trait]
impl Spell for RewindUncommittedChangesSpell {
    fn id(&self) -> HealerSpellId {
        HealerSpellId::RewindUncommittedChanges
    }

    fn description(&self) -> &str {
        "Revert tracked changes and remove untracked files"
    }

    async fn apply(&self, ctx: &HealerContext) -> HealerSpellResult {
        if !ctx.git_status.is_dirty {
            return HealerSpellResult::success("Working tree already clean, nothing to rewind");
        }

        let root: PathBuf = ctx.project_root.clone();
        match tokio::task::spawn_blocking(move || rewind_blocking(&root)).await {
            Ok(result) => result,
            Err(e) => HealerSpellResult::failure("Rewind did not complete", e.to_string()),
        }
    }
}

fn rewind_blocking(root: &Path) -> HealerSpellResult {
    let status = match run_git(root, &["status", "--porcelain"]) {
        Ok(output) if output.status.success() => {
            GitStatus::from_porcelain(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            return HealerSpellResult::failure(
                "Could not enumerate changes",
                stderr_of(&output),
            );
        }
        Err(e) => return HealerSpellResult::failure("Could not enumerate changes", e.to_string()),
    };

    let keep_pathspec = format!(":(exclude){}", OPENAGENTS_DIR);
    for (label, args) in [
        ("git restore", ["restore", "--", ".", keep_pathspec.as_str()].as_slice()),
        ("git clean", ["clean", "-fd", "-e", OPENAGENTS_DIR].as_slice()),
    ] {
        match run_git(root, args) {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                return HealerSpellResult::failure(format!("{} failed", label), stderr_of(&output));
            }
            Err(e) => return HealerSpellResult::failure(format!("{} failed", label), e.to_string()),
        }
    }

    let keep = |files: Vec<String>| -> Vec<String> {
        files.into_iter().filter(|f| !is_state_path(f)).collect()
    };
    let modified = keep(status.modified_files);
    let untracked = keep(status.untracked_files);

    info!(
        modified = modified.len(),
        untracked = untracked.len(),
        "Rewound uncommitted changes"
    );

    let summary = format!(
        "Rewound {} modified and {} untracked file(s)",
        modified.len(),
        untracked.len()
    );
    let mut files = modified;
    files.extend(untracked);

    HealerSpellResult::success(summary)
        .with_changes(!files.is_empty())
        .with_files(files)
}

fn is_state_path(path: &str) -> bool {
    path.trim_end_matches('/') == OPENAGENTS_DIR
        || path.starts_with(&format!("{}/", OPENAGENTS_DIR))
}

fn stderr_of(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exit status {}", output.status)
    } else {
        stderr
    }
}
