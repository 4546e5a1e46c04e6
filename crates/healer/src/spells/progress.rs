use super::{HealerSpellId, HealerSpellResult, Spell, TaskStoreRequest};
use crate::config::OPENAGENTS_DIR;
use crate::context::HealerContext;
use crate::patterns::excerpt;
use crate::scenario::HealerScenario;
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;

/// Progress file (relative to [`OPENAGENTS_DIR`])
pub const PROGRESS_FILE: &str = "progress.md";

/// Appends a guidance section to `.openagents/progress.md` and returns the
/// same guidance as a progress note request for the task.
pub struct UpdateProgressSpell;

#[async_trait]
impl Spell for UpdateProgressSpell {
    fn id(&self) -> HealerSpellId {
        HealerSpellId::UpdateProgressWithGuidance
    }

    fn description(&self) -> &str {
        "Record failure details and next-step guidance in progress.md"
    }

    async fn apply(&self, ctx: &HealerContext) -> HealerSpellResult {
        let guidance = build_progress_guidance(ctx);
        let dir = ctx.project_root.join(OPENAGENTS_DIR);
        let path = dir.join(PROGRESS_FILE);

        if let Err(e) = append_section(&dir, &path, &guidance) {
            return HealerSpellResult::failure(
                "Could not update progress file",
                format!("{}: {}", path.display(), e),
            );
        }

        HealerSpellResult::success(format!("Appended Healer guidance to {}", path.display()))
            .with_changes(true)
            .with_files(vec![path.display().to_string()])
            .with_request(TaskStoreRequest::AttachProgressNote {
                task_id: ctx.task_id().map(str::to_string),
                note: guidance,
            })
    }
}

fn append_section(dir: &Path, path: &Path, section: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file)?;
    writeln!(file, "{}", section)?;
    file.sync_all()
}

/// Guidance section derived from the current heuristics
pub fn build_progress_guidance(ctx: &HealerContext) -> String {
    let heuristics = &ctx.heuristics;
    let mut lines = vec![
        "## Healer Guidance".to_string(),
        String::new(),
        format!("- **Time:** {}", ctx.invoked_at.to_rfc3339()),
        format!("- **Scenario:** {}", ctx.scenario()),
    ];
    if let Some(task_id) = ctx.task_id() {
        lines.push(format!("- **Task:** {}", task_id));
    }
    if let Some(subtask_id) = ctx.subtask_id() {
        lines.push(format!("- **Subtask:** {}", subtask_id));
    }
    if heuristics.failure_count > 0 {
        lines.push(format!("- **Failures so far:** {}", heuristics.failure_count));
    }
    if let Some(error) = ctx.error_output.as_deref() {
        let first = error.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        lines.push(format!("- **Last error:** {}", excerpt(first.trim(), 200)));
    }

    lines.push(String::new());
    lines.push("Next session should:".to_string());
    if heuristics.has_type_errors {
        lines.push("- Fix type errors before starting new work".to_string());
    }
    if heuristics.has_missing_imports {
        lines.push("- Verify imports and module paths".to_string());
    }
    if heuristics.has_test_assertions {
        lines.push("- Start from the failing test assertions".to_string());
    }
    if heuristics.is_flaky {
        lines.push("- Treat this failure as possibly flaky; errors differ between runs".to_string());
    }
    lines.push(match ctx.scenario() {
        HealerScenario::InitScriptTypecheckFailure | HealerScenario::InitScriptTestFailure => {
            "- Get the init script passing again".to_string()
        }
        HealerScenario::InitScriptEnvironmentFailure => {
            "- Check the environment (network, disk, permissions) before retrying".to_string()
        }
        HealerScenario::VerificationFailed => {
            "- Re-run verification and address the failures it reports".to_string()
        }
        HealerScenario::SubtaskFailed | HealerScenario::SubtaskStuck => {
            "- Try a smaller, more focused approach to the subtask".to_string()
        }
        HealerScenario::RuntimeError => "- Inspect the runtime error before resuming".to_string(),
    });

    lines.join("\n")
}
