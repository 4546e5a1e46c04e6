//! Scenario classification
//!
//! Maps orchestrator events onto the closed set of failure scenarios the
//! Healer knows how to respond to. Everything here is pure.

use crate::types::{InitScriptFailureType, InitScriptResult, OrchestratorEvent, Subtask};
use serde::{Deserialize, Serialize};

/// Scenarios that trigger Healer invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealerScenario {
    /// Init script failed on type errors
    InitScriptTypecheckFailure,
    /// Init script failed on test failures
    InitScriptTestFailure,
    /// Init script failed for environmental reasons (network, disk, ...)
    InitScriptEnvironmentFailure,
    /// A subtask failed during execution
    SubtaskFailed,
    /// Post-work verification failed
    VerificationFailed,
    /// Unexpected runtime error in the orchestrator
    RuntimeError,
    /// A subtask stopped making progress (stuck detector path)
    SubtaskStuck,
}

impl HealerScenario {
    pub const ALL: [HealerScenario; 7] = [
        HealerScenario::InitScriptTypecheckFailure,
        HealerScenario::InitScriptTestFailure,
        HealerScenario::InitScriptEnvironmentFailure,
        HealerScenario::SubtaskFailed,
        HealerScenario::VerificationFailed,
        HealerScenario::RuntimeError,
        HealerScenario::SubtaskStuck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HealerScenario::InitScriptTypecheckFailure => "InitScriptTypecheckFailure",
            HealerScenario::InitScriptTestFailure => "InitScriptTestFailure",
            HealerScenario::InitScriptEnvironmentFailure => "InitScriptEnvironmentFailure",
            HealerScenario::SubtaskFailed => "SubtaskFailed",
            HealerScenario::VerificationFailed => "VerificationFailed",
            HealerScenario::RuntimeError => "RuntimeError",
            HealerScenario::SubtaskStuck => "SubtaskStuck",
        }
    }

    pub fn is_init_failure(&self) -> bool {
        matches!(
            self,
            HealerScenario::InitScriptTypecheckFailure
                | HealerScenario::InitScriptTestFailure
                | HealerScenario::InitScriptEnvironmentFailure
        )
    }
}

impl std::fmt::Display for HealerScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an orchestrator event. `None` means the event is not a trigger.
pub fn map_event_to_scenario(event: &OrchestratorEvent) -> Option<HealerScenario> {
    match event {
        OrchestratorEvent::InitScriptComplete { result } if !result.success => {
            Some(match result.failure_type {
                Some(InitScriptFailureType::TypecheckFailed) => {
                    HealerScenario::InitScriptTypecheckFailure
                }
                Some(InitScriptFailureType::TestFailed) => HealerScenario::InitScriptTestFailure,
                _ => HealerScenario::InitScriptEnvironmentFailure,
            })
        }
        OrchestratorEvent::InitScriptComplete { .. } => None,
        OrchestratorEvent::SubtaskFailed { .. } => Some(HealerScenario::SubtaskFailed),
        OrchestratorEvent::VerificationComplete { passed: false, .. } => {
            Some(HealerScenario::VerificationFailed)
        }
        OrchestratorEvent::VerificationComplete { .. } => None,
        OrchestratorEvent::Error { .. } => Some(HealerScenario::RuntimeError),
        OrchestratorEvent::SessionStart { .. }
        | OrchestratorEvent::InitScriptStart { .. }
        | OrchestratorEvent::TaskSelected { .. }
        | OrchestratorEvent::TaskDecomposed { .. }
        | OrchestratorEvent::SubtaskStart { .. }
        | OrchestratorEvent::SubtaskComplete { .. }
        | OrchestratorEvent::VerificationStart { .. }
        | OrchestratorEvent::CommitCreated { .. }
        | OrchestratorEvent::SessionComplete { .. }
        | OrchestratorEvent::Unknown => None,
    }
}

/// Best-effort human-readable error text carried by an event.
pub fn get_error_output(event: &OrchestratorEvent) -> Option<String> {
    let text = match event {
        OrchestratorEvent::InitScriptComplete { result } => {
            result.output.as_deref().or(result.error.as_deref())
        }
        OrchestratorEvent::SubtaskFailed { error, .. } => Some(error.as_str()),
        OrchestratorEvent::VerificationComplete { output, .. } => Some(output.as_str()),
        OrchestratorEvent::Error { error, .. } => Some(error.as_str()),
        _ => None,
    };

    text.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Only an explicit `canSelfHeal=true` counts as healable.
pub fn is_healable_init_failure(result: &InitScriptResult) -> bool {
    result.can_self_heal == Some(true)
}

/// Subtask carried by an event, if any.
pub fn event_subtask(event: &OrchestratorEvent) -> Option<&Subtask> {
    match event {
        OrchestratorEvent::SubtaskStart { subtask }
        | OrchestratorEvent::SubtaskComplete { subtask, .. }
        | OrchestratorEvent::SubtaskFailed { subtask, .. } => Some(subtask),
        _ => None,
    }
}

/// Subtask id carried by an event, if any.
pub fn event_subtask_id(event: &OrchestratorEvent) -> Option<&str> {
    event_subtask(event).map(|s| s.id.as_str())
}
