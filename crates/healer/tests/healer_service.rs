//! End-to-end Healer flows against a temporary project root

use async_trait::async_trait;
use healer::{
    GitStatus, Healer, HealerConfig, HealerContext, HealerInvocation, HealerMode,
    HealerOutcomeStatus, HealerSpellId, HealerSpellResult, HealerSpellsConfig,
    InitScriptFailureType, InitScriptResult, OrchestratorEvent, OrchestratorState, Spell,
    SpellRegistry, Subtask, TaskRef,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::tempdir;

/// Stands in for an LLM-backed `fix_test_errors`; fails until call
/// `succeed_from`.
struct CountingFix {
    calls: Arc<AtomicU32>,
    succeed_from: u32,
}

#[async_trait]
impl Spell for CountingFix {
    fn id(&self) -> HealerSpellId {
        HealerSpellId::FixTestErrors
    }

    fn description(&self) -> &str {
        "counting test double"
    }

    async fn apply(&self, _ctx: &HealerContext) -> HealerSpellResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= self.succeed_from {
            HealerSpellResult::success("fixed the failing tests").with_changes(true)
        } else {
            HealerSpellResult::failure("tests still failing", "1 failed")
        }
    }
}

fn repair_config() -> HealerConfig {
    HealerConfig {
        mode: HealerMode::Auto,
        spells: HealerSpellsConfig {
            allowed: Some(vec!["fix_test_errors".to_string()]),
            forbidden: None,
        },
        max_invocations_per_session: 10,
        ..Default::default()
    }
}

fn healer_with_fix(root: &Path, calls: &Arc<AtomicU32>, succeed_from: u32) -> Healer {
    let mut registry = SpellRegistry::new();
    registry.register(CountingFix {
        calls: Arc::clone(calls),
        succeed_from,
    });
    Healer::new(root, repair_config())
        .with_registry(registry)
        .with_trajectories(false)
}

fn state() -> OrchestratorState {
    OrchestratorState {
        session_id: "orch-session".to_string(),
        task: Some(TaskRef {
            id: "oa-42".to_string(),
            title: "Make tests pass".to_string(),
            description: None,
        }),
        ..Default::default()
    }
}

fn test_failure(output: &str) -> HealerInvocation {
    HealerInvocation::new(OrchestratorEvent::InitScriptComplete {
        result: InitScriptResult::failed(InitScriptFailureType::TestFailed, output),
    })
    .with_state(state())
    .with_git_status(GitStatus::clean())
}

fn subtask_failure(subtask_id: &str, error: &str) -> HealerInvocation {
    HealerInvocation::new(OrchestratorEvent::SubtaskFailed {
        subtask: Subtask::new(subtask_id, "implement"),
        error: error.to_string(),
    })
    .with_state(state())
    .with_git_status(GitStatus::clean())
}

#[tokio::test]
async fn resolved_failure_is_not_retried_after_restart() {
    let dir = tempdir().unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let mut first = healer_with_fix(dir.path(), &calls, 1);
    let outcome = first
        .heal(test_failure("test parser::works ... FAILED at 2025-01-01T10:00:00Z"))
        .await
        .unwrap();
    assert_eq!(outcome.status, HealerOutcomeStatus::Resolved);
    assert_eq!(outcome.spells_tried, vec![HealerSpellId::FixTestErrors]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    drop(first);

    // Fresh process: empty counters, same persisted store
    let mut second = healer_with_fix(dir.path(), &calls, 1);
    assert_eq!(second.counters().session_invocations, 0);
    let outcome = second
        .heal(test_failure("test parser::works ... FAILED at 2025-01-02T11:30:00Z"))
        .await
        .unwrap();
    assert_eq!(outcome.status, HealerOutcomeStatus::Skipped);
    assert!(outcome.summary.contains("Already resolved"));
    assert!(outcome.fingerprint.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unresolved_failure_is_retried_until_resolved() {
    let dir = tempdir().unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let mut healer = healer_with_fix(dir.path(), &calls, 2);

    let outcome = healer.heal(test_failure("1 failed")).await.unwrap();
    assert_eq!(outcome.status, HealerOutcomeStatus::Unresolved);

    let outcome = healer.heal(test_failure("1 failed")).await.unwrap();
    assert_eq!(outcome.status, HealerOutcomeStatus::Resolved);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let run = healer.last_run().unwrap();
    assert_eq!(run.context.heuristics.previous_attempts, 1);

    let outcome = healer.heal(test_failure("1 failed")).await.unwrap();
    assert_eq!(outcome.status, HealerOutcomeStatus::Skipped);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let attempts = healer.dedup_mut().attempts().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, HealerOutcomeStatus::Resolved);
}

#[tokio::test]
async fn distinct_error_after_resolution_runs_again() {
    let dir = tempdir().unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let mut healer = healer_with_fix(dir.path(), &calls, 1);

    healer.heal(test_failure("assertion failed: left == right")).await.unwrap();
    let outcome = healer
        .heal(test_failure("thread 'main' panicked at src/lib.rs:10:5"))
        .await
        .unwrap();
    assert_eq!(outcome.status, HealerOutcomeStatus::Resolved);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let heuristics = &healer.last_run().unwrap().context.heuristics;
    assert!(heuristics.is_flaky);
    assert_eq!(heuristics.previous_attempts, 1);
}

#[tokio::test]
async fn manual_reset_allows_a_retry() {
    let dir = tempdir().unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let mut healer = healer_with_fix(dir.path(), &calls, 1);

    healer.heal(test_failure("1 failed")).await.unwrap();
    assert_eq!(healer.dedup_mut().reset_task("oa-42").unwrap(), 1);

    let outcome = healer.heal(test_failure("1 failed")).await.unwrap();
    assert_eq!(outcome.status, HealerOutcomeStatus::Resolved);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn conservative_mode_skips_llm_spells() {
    let dir = tempdir().unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = SpellRegistry::new();
    registry.register(CountingFix {
        calls: Arc::clone(&calls),
        succeed_from: 1,
    });
    let mut healer = Healer::new(dir.path(), HealerConfig::default())
        .with_registry(registry)
        .with_trajectories(false);

    let outcome = healer.heal(test_failure("1 failed")).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        outcome.spells_tried,
        vec![
            HealerSpellId::UpdateProgressWithGuidance,
            HealerSpellId::MarkTaskBlockedWithFollowup,
        ]
    );
    assert_eq!(outcome.status, HealerOutcomeStatus::Blocked);
}

#[tokio::test]
async fn invocation_ceilings_apply() {
    let dir = tempdir().unwrap();
    let mut healer = Healer::new(dir.path(), HealerConfig::default()).with_trajectories(false);

    let outcome = healer.heal(subtask_failure("sub-1", "boom")).await.unwrap();
    assert_ne!(outcome.status, HealerOutcomeStatus::Skipped);

    let outcome = healer.heal(subtask_failure("sub-1", "bang")).await.unwrap();
    assert_eq!(outcome.status, HealerOutcomeStatus::Skipped);
    assert_eq!(outcome.summary, "Subtask limit reached for 'sub-1' (1/1)");

    let outcome = healer.heal(subtask_failure("sub-2", "boom")).await.unwrap();
    assert_ne!(outcome.status, HealerOutcomeStatus::Skipped);

    let outcome = healer.heal(subtask_failure("sub-3", "boom")).await.unwrap();
    assert_eq!(outcome.status, HealerOutcomeStatus::Skipped);
    assert_eq!(outcome.summary, "Session limit reached (2/2)");

    assert_eq!(healer.counters().session_invocations, 2);

    healer.reset_counters();
    let outcome = healer.heal(subtask_failure("sub-3", "boom")).await.unwrap();
    assert_ne!(outcome.status, HealerOutcomeStatus::Skipped);
}

#[tokio::test]
async fn disabled_healer_never_runs() {
    let dir = tempdir().unwrap();
    let config = HealerConfig {
        enabled: false,
        ..Default::default()
    };
    let mut healer = Healer::new(dir.path(), config);
    let outcome = healer.heal(subtask_failure("sub-1", "boom")).await.unwrap();
    assert_eq!(outcome.status, HealerOutcomeStatus::Skipped);
    assert_eq!(outcome.summary, "Healer is disabled in config");
    assert!(healer.dedup_mut().attempts().unwrap().is_empty());
}

#[tokio::test]
async fn project_config_is_loaded() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join(".openagents")).unwrap();
    std::fs::write(
        dir.path().join(".openagents/project.json"),
        r#"{"healer": {"scenarios": {"onSubtaskFailure": false}}}"#,
    )
    .unwrap();

    let mut healer = Healer::for_project(dir.path()).unwrap();
    let outcome = healer.heal(subtask_failure("sub-1", "boom")).await.unwrap();
    assert_eq!(outcome.status, HealerOutcomeStatus::Skipped);
    assert_eq!(outcome.summary, "Scenario 'SubtaskFailed' is disabled in config");
}

#[tokio::test]
async fn trajectory_is_written_and_linked() {
    let dir = tempdir().unwrap();
    let mut healer = Healer::new(dir.path(), HealerConfig::default());
    let outcome = healer
        .heal(subtask_failure("sub-1", "boom").with_parent_trajectory("orch-session"))
        .await
        .unwrap();

    let session = outcome.trajectory_session_id.unwrap();
    let path = dir
        .path()
        .join(".openagents/trajectories/healer")
        .join(format!("{}.json", session));
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(json["parent_session_id"], "orch-session");
    assert_eq!(json["steps"][0]["kind"], "healer_start");
    assert_eq!(json["steps"][0]["step_id"], 1);
}
