use super::{HealerSpellId, HealerSpellResult, Spell, TaskStoreRequest};
use crate::context::HealerContext;
use crate::patterns::{excerpt, truncate_chars};
use crate::scenario::HealerScenario;
use async_trait::async_trait;

const MAX_FOLLOWUP_PATTERNS: usize = 5;
const MAX_FOLLOWUP_ERROR_CHARS: usize = 1000;
const MAX_REASON_ERROR_CHARS: usize = 200;

/// Prepares a block reason and a follow-up task. Pure: the requests are
/// returned for the task-store owner to apply.
pub struct MarkTaskBlockedSpell;

#[async_trait]
impl Spell for MarkTaskBlockedSpell {
    fn id(&self) -> HealerSpellId {
        HealerSpellId::MarkTaskBlockedWithFollowup
    }

    fn description(&self) -> &str {
        "Mark the task blocked and prepare a follow-up investigation task"
    }

    async fn apply(&self, ctx: &HealerContext) -> HealerSpellResult {
        let reason = build_block_reason(ctx);
        let description = build_followup_description(ctx);
        let task_id = ctx.task_id().map(str::to_string);

        let title = match &task_id {
            Some(id) => format!("Investigate {} in {}", ctx.scenario(), id),
            None => format!("Investigate {}", ctx.scenario()),
        };

        let mut result = HealerSpellResult::success(match &task_id {
            Some(id) => format!("Prepared block and follow-up for task {}", id),
            None => "Prepared follow-up (no task to block)".to_string(),
        });

        if let Some(id) = &task_id {
            result = result.with_request(TaskStoreRequest::BlockTask {
                task_id: id.clone(),
                reason,
            });
        }

        result.with_request(TaskStoreRequest::CreateFollowup {
            parent_task_id: task_id,
            title,
            description,
        })
    }
}

/// One-paragraph, human-readable reason for blocking the task
pub fn build_block_reason(ctx: &HealerContext) -> String {
    let heuristics = &ctx.heuristics;
    let mut reason = format!(
        "Healer contained {} after {} failure(s)",
        ctx.scenario(),
        heuristics.failure_count
    );

    let mut flags = Vec::new();
    if heuristics.has_type_errors {
        flags.push("type errors");
    }
    if heuristics.has_test_assertions {
        flags.push("failing assertions");
    }
    if heuristics.has_missing_imports {
        flags.push("missing imports");
    }
    if !flags.is_empty() {
        reason.push_str(&format!(" ({})", flags.join(", ")));
    }

    if let Some(error) = ctx.error_output.as_deref() {
        let first = error.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        reason.push_str(&format!(
            ". Error: {}",
            excerpt(first.trim(), MAX_REASON_ERROR_CHARS)
        ));
    }

    reason
}

/// Markdown description for the follow-up investigation task
pub fn build_followup_description(ctx: &HealerContext) -> String {
    let heuristics = &ctx.heuristics;
    let mut lines = vec!["## Context".to_string(), String::new()];

    match &ctx.task {
        Some(task) => lines.push(format!("- **Task:** {} ({})", task.id, task.title)),
        None => lines.push("- **Task:** none".to_string()),
    }
    if let Some(subtask) = &ctx.subtask {
        lines.push(format!(
            "- **Subtask:** {} - {}",
            subtask.id,
            excerpt(&subtask.description, 80)
        ));
    }
    lines.push(format!("- **Scenario:** {}", ctx.scenario()));
    lines.push(format!("- **Session:** {}", ctx.session_id));

    lines.push(String::new());
    lines.push("## Failure Details".to_string());
    lines.push(String::new());
    lines.push(format!("- **Failure count:** {}", heuristics.failure_count));
    if heuristics.previous_attempts > 0 {
        lines.push(format!(
            "- **Previous Healer attempts:** {}",
            heuristics.previous_attempts
        ));
    }
    if heuristics.is_flaky {
        lines.push("- **Flaky:** different errors were seen for this failure".to_string());
    }
    if !heuristics.error_patterns.is_empty() {
        lines.push("- **Error patterns:**".to_string());
        for pattern in heuristics.error_patterns.iter().take(MAX_FOLLOWUP_PATTERNS) {
            lines.push(format!("  - {}", pattern));
        }
    }
    if let Some(error) = ctx.error_output.as_deref() {
        lines.push(String::new());
        lines.push("```".to_string());
        lines.push(truncate_chars(error, MAX_FOLLOWUP_ERROR_CHARS));
        lines.push("```".to_string());
    }

    lines.push(String::new());
    lines.push("## Suggested Investigation".to_string());
    lines.push(String::new());
    for (i, step) in investigation_steps(ctx).iter().enumerate() {
        lines.push(format!("{}. {}", i + 1, step));
    }

    lines.push(String::new());
    lines.push("## Trajectory".to_string());
    lines.push(String::new());
    match &ctx.trajectory_session_id {
        Some(session) => lines.push(format!("- Healer trajectory: {}", session)),
        None => lines.push(format!("- Orchestrator session: {}", ctx.session_id)),
    }
    if let Some(parent) = &ctx.parent_trajectory {
        lines.push(format!("- Parent trajectory: {}", parent));
    }

    lines.join("\n")
}

fn investigation_steps(ctx: &HealerContext) -> Vec<&'static str> {
    let heuristics = &ctx.heuristics;
    let mut steps = Vec::new();

    if heuristics.has_type_errors {
        steps.push("Run the type checker and fix the reported errors");
    }
    if heuristics.has_missing_imports {
        steps.push("Check import paths and declared dependencies");
    }
    if heuristics.has_test_assertions {
        steps.push("Run the failing tests in isolation and compare expected vs actual values");
    }

    match ctx.scenario() {
        HealerScenario::InitScriptEnvironmentFailure => {
            steps.push("Check network access, disk space and file permissions");
        }
        HealerScenario::VerificationFailed => {
            steps.push("Re-run the verification command locally");
        }
        HealerScenario::RuntimeError => {
            steps.push("Inspect orchestrator logs around the error");
        }
        HealerScenario::SubtaskStuck => {
            steps.push("Check whether the subtask scope is too large and split it");
        }
        _ => {}
    }

    steps.push("Review the trajectory for the failing session");
    steps
}
