//! Healer outcome and status rules

use crate::scenario::HealerScenario;
use crate::spells::{HealerSpellId, SpellExecution, TaskStoreRequest};
use serde::{Deserialize, Serialize};

/// Outcome status after Healer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealerOutcomeStatus {
    /// Problem fixed, orchestrator can continue
    Resolved,
    /// Could not fix or contain, orchestrator should abort
    Unresolved,
    /// Problem contained (progress updated, tree rewound), stop gracefully
    Contained,
    /// Healer chose not to run (policy, limits, already resolved)
    Skipped,
    /// Task should be blocked with a follow-up
    Blocked,
}

impl HealerOutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealerOutcomeStatus::Resolved => "resolved",
            HealerOutcomeStatus::Unresolved => "unresolved",
            HealerOutcomeStatus::Contained => "contained",
            HealerOutcomeStatus::Skipped => "skipped",
            HealerOutcomeStatus::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for HealerOutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall result from a Healer invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealerOutcome {
    /// `None` when the event was not a trigger at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<HealerScenario>,
    pub status: HealerOutcomeStatus,
    pub spells_tried: Vec<HealerSpellId>,
    pub spells_succeeded: Vec<HealerSpellId>,
    pub summary: String,
    /// Whether verification passed after healing (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_passed: Option<bool>,
    /// Trajectory session id for this Healer invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory_session_id: Option<String>,
    /// Dedup fingerprint key for this failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Task-store mutations for the caller to apply
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<TaskStoreRequest>,
}

impl HealerOutcome {
    pub fn skipped(scenario: Option<HealerScenario>, reason: impl Into<String>) -> Self {
        Self {
            scenario,
            status: HealerOutcomeStatus::Skipped,
            spells_tried: Vec::new(),
            spells_succeeded: Vec::new(),
            summary: reason.into(),
            verification_passed: None,
            trajectory_session_id: None,
            fingerprint: None,
            requests: Vec::new(),
        }
    }

    /// Fold executed spells into an outcome
    pub fn from_executions(scenario: HealerScenario, executions: &[SpellExecution]) -> Self {
        let status = determine_outcome_status(executions);

        let spells_tried = executions.iter().filter_map(SpellExecution::id).collect();
        let spells_succeeded = executions
            .iter()
            .filter(|e| e.result.success)
            .filter_map(SpellExecution::id)
            .collect();

        let requests = executions
            .iter()
            .flat_map(|e| e.result.requests.iter().cloned())
            .filter(|r| status != HealerOutcomeStatus::Resolved || !r.is_containment())
            .collect();

        Self {
            scenario: Some(scenario),
            status,
            spells_tried,
            spells_succeeded,
            summary: summarize_executions(scenario, status, executions),
            verification_passed: None,
            trajectory_session_id: None,
            fingerprint: None,
            requests,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_trajectory_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.trajectory_session_id = Some(session_id.into());
        self
    }

    pub fn with_verification_passed(mut self, passed: bool) -> Self {
        self.verification_passed = Some(passed);
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.status == HealerOutcomeStatus::Resolved
    }

    pub fn is_contained(&self) -> bool {
        self.status == HealerOutcomeStatus::Contained
    }
}

/// Status for a set of executed spells.
///
/// 1. nothing ran: unresolved
/// 2. any spell failed: unresolved
/// 3. a repair spell applied changes: resolved
/// 4. the block spell succeeded: blocked
/// 5. otherwise: contained
pub fn determine_outcome_status(executions: &[SpellExecution]) -> HealerOutcomeStatus {
    if executions.is_empty() || executions.iter().any(|e| !e.result.success) {
        return HealerOutcomeStatus::Unresolved;
    }

    let repaired = executions.iter().any(|e| {
        e.id().is_some_and(|id| id.is_repair()) && e.result.changes_applied
    });
    if repaired {
        return HealerOutcomeStatus::Resolved;
    }

    if executions
        .iter()
        .any(|e| e.id() == Some(HealerSpellId::MarkTaskBlockedWithFollowup))
    {
        return HealerOutcomeStatus::Blocked;
    }

    HealerOutcomeStatus::Contained
}

fn summarize_executions(
    scenario: HealerScenario,
    status: HealerOutcomeStatus,
    executions: &[SpellExecution],
) -> String {
    if executions.is_empty() {
        return format!("No spells available for scenario '{}'", scenario);
    }

    let parts: Vec<String> = executions
        .iter()
        .map(|e| {
            let mark = if e.result.success { "ok" } else { "failed" };
            format!("{} {}: {}", e.spell_id, mark, e.result.summary)
        })
        .collect();
    format!("{} ({}): {}", status, scenario, parts.join("; "))
}
