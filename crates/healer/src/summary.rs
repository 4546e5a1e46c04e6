//! Markdown report for a Healer invocation

use crate::context::HealerContext;
use crate::patterns::excerpt;
use crate::scenario::HealerScenario;
use crate::spells::HealerSpellId;

const SUMMARY_ERROR_CHARS: usize = 500;

/// Render the Healer summary. Pure: the output depends only on the context
/// and the two id lists.
pub fn generate_healer_summary(
    ctx: &HealerContext,
    tried: &[HealerSpellId],
    succeeded: &[HealerSpellId],
) -> String {
    let mut lines = vec![
        "## Healer Summary".to_string(),
        String::new(),
        format!("**Invoked at:** {}", ctx.invoked_at.to_rfc3339()),
        format!("**Scenario:** {}", ctx.scenario()),
    ];
    if let Some(task_id) = ctx.task_id() {
        lines.push(format!("**Task:** {}", task_id));
    }
    lines.push(format!("**Subtask:** {}", ctx.subtask_id().unwrap_or("none")));

    lines.push(String::new());
    lines.push("### Spells".to_string());
    lines.push(String::new());
    if tried.is_empty() {
        lines.push("- No spells were run".to_string());
    }
    for spell in tried {
        let mark = if succeeded.contains(spell) { "✓" } else { "✗" };
        lines.push(format!("- {} {}", mark, spell));
    }

    if let Some(error) = ctx.error_output.as_deref() {
        lines.push(String::new());
        lines.push("### Error".to_string());
        lines.push(String::new());
        lines.push("```".to_string());
        lines.push(excerpt(error.trim(), SUMMARY_ERROR_CHARS));
        lines.push("```".to_string());
    }

    if ctx.git_status.is_dirty {
        lines.push(String::new());
        lines.push("### Git Status".to_string());
        lines.push(String::new());
        lines.push(format!(
            "- Modified files: {}",
            ctx.git_status.modified_files.len()
        ));
        lines.push(format!(
            "- Untracked files: {}",
            ctx.git_status.untracked_files.len()
        ));
    }

    lines.push(String::new());
    lines.push("### Recommended Next Steps".to_string());
    lines.push(String::new());
    for step in next_steps(ctx.scenario()) {
        lines.push(format!("- {}", step));
    }

    lines.join("\n")
}

fn next_steps(scenario: HealerScenario) -> &'static [&'static str] {
    match scenario {
        HealerScenario::InitScriptTypecheckFailure => &[
            "Run the type checker and fix the reported errors",
            "Re-run the init script once the project type-checks",
        ],
        HealerScenario::InitScriptTestFailure => &[
            "Run the test suite and fix the failing tests",
            "Re-run the init script once tests pass",
        ],
        HealerScenario::InitScriptEnvironmentFailure => &[
            "Check network connectivity, disk space and permissions",
            "Retry once the environment is healthy",
        ],
        HealerScenario::SubtaskFailed => &[
            "Review the subtask error and the rewound changes",
            "Retry the subtask with a narrower scope",
        ],
        HealerScenario::VerificationFailed => &[
            "Re-run the verification command and inspect its output",
            "Fix the failures before committing",
        ],
        HealerScenario::RuntimeError => &[
            "Inspect the orchestrator logs around the error",
            "Restart the session once the cause is understood",
        ],
        HealerScenario::SubtaskStuck => &[
            "Check whether the subtask is waiting on something external",
            "Split the subtask or mark it blocked",
        ],
    }
}
