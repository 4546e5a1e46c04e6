//! Policy gate and spell planning
//!
//! `should_run_healer` is side-effect free: the caller advances counters with
//! [`increment_counters`] only after it has acted on a run decision.

use crate::config::{HealerConfig, HealerMode};
use crate::scenario::{HealerScenario, map_event_to_scenario};
use crate::spells::HealerSpellId;
use crate::types::OrchestratorEvent;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ============================================================================
// Counters
// ============================================================================

/// Invocation counters for rate limiting. Ephemeral, one per session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealerCounters {
    /// Total Healer invocations this session
    pub session_invocations: u32,
    /// Healer invocations per subtask (keyed by subtask ID)
    pub subtask_invocations: HashMap<String, u32>,
}

impl HealerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subtask_count(&self, subtask_id: &str) -> u32 {
        self.subtask_invocations
            .get(subtask_id)
            .copied()
            .unwrap_or(0)
    }
}

/// Advance counters after a run decision.
///
/// The subtask entry is only touched when a subtask id is supplied.
pub fn increment_counters(counters: &mut HealerCounters, subtask_id: Option<&str>) {
    counters.session_invocations += 1;
    if let Some(id) = subtask_id {
        *counters
            .subtask_invocations
            .entry(id.to_string())
            .or_insert(0) += 1;
    }
}

// ============================================================================
// Policy Decision
// ============================================================================

/// Result of checking whether Healer should run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealerPolicyDecision {
    pub run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<HealerScenario>,
    pub reason: String,
}

impl HealerPolicyDecision {
    pub fn should_run(scenario: HealerScenario, reason: impl Into<String>) -> Self {
        Self {
            run: true,
            scenario: Some(scenario),
            reason: reason.into(),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            run: false,
            scenario: None,
            reason: reason.into(),
        }
    }

    pub fn skip_scenario(scenario: HealerScenario, reason: impl Into<String>) -> Self {
        Self {
            run: false,
            scenario: Some(scenario),
            reason: reason.into(),
        }
    }
}

pub fn is_scenario_enabled(scenario: HealerScenario, config: &HealerConfig) -> bool {
    match scenario {
        HealerScenario::InitScriptTypecheckFailure
        | HealerScenario::InitScriptTestFailure
        | HealerScenario::InitScriptEnvironmentFailure => config.scenarios.on_init_failure,
        HealerScenario::VerificationFailed => config.scenarios.on_verification_failure,
        HealerScenario::SubtaskFailed => config.scenarios.on_subtask_failure,
        HealerScenario::RuntimeError => config.scenarios.on_runtime_error,
        HealerScenario::SubtaskStuck => config.scenarios.on_stuck_subtask,
    }
}

/// Decide whether the Healer should run for an event.
///
/// Checks short-circuit in order: global switch, classification, scenario
/// toggle, session ceiling, subtask ceiling.
pub fn should_run_healer(
    event: &OrchestratorEvent,
    config: &HealerConfig,
    counters: &HealerCounters,
    subtask_id: Option<&str>,
) -> HealerPolicyDecision {
    if !config.enabled {
        return HealerPolicyDecision::skip("Healer is disabled in config");
    }

    let Some(scenario) = map_event_to_scenario(event) else {
        return HealerPolicyDecision::skip(format!(
            "Event '{}' does not trigger Healer",
            event.kind()
        ));
    };

    should_run_for_scenario(scenario, config, counters, subtask_id)
}

/// Gate checks for an already classified scenario (the stuck detector path
/// enters here directly).
pub fn should_run_for_scenario(
    scenario: HealerScenario,
    config: &HealerConfig,
    counters: &HealerCounters,
    subtask_id: Option<&str>,
) -> HealerPolicyDecision {
    if !config.enabled {
        return HealerPolicyDecision::skip("Healer is disabled in config");
    }

    if !is_scenario_enabled(scenario, config) {
        return HealerPolicyDecision::skip_scenario(
            scenario,
            format!("Scenario '{}' is disabled in config", scenario),
        );
    }

    if counters.session_invocations >= config.max_invocations_per_session {
        return HealerPolicyDecision::skip_scenario(
            scenario,
            format!(
                "Session limit reached ({}/{})",
                counters.session_invocations, config.max_invocations_per_session
            ),
        );
    }

    if let Some(id) = subtask_id {
        let count = counters.subtask_count(id);
        if count >= config.max_invocations_per_subtask {
            return HealerPolicyDecision::skip_scenario(
                scenario,
                format!(
                    "Subtask limit reached for '{}' ({}/{})",
                    id, count, config.max_invocations_per_subtask
                ),
            );
        }
    }

    HealerPolicyDecision::should_run(
        scenario,
        format!("Triggering Healer for scenario '{}'", scenario),
    )
}

// ============================================================================
// Spell Planning
// ============================================================================

/// Default spell sequence for a scenario
pub fn get_scenario_spells(scenario: HealerScenario) -> Vec<HealerSpellId> {
    match scenario {
        HealerScenario::InitScriptTypecheckFailure => vec![
            HealerSpellId::FixTypecheckErrors,
            HealerSpellId::UpdateProgressWithGuidance,
            HealerSpellId::MarkTaskBlockedWithFollowup,
        ],
        HealerScenario::InitScriptTestFailure => vec![
            HealerSpellId::FixTestErrors,
            HealerSpellId::UpdateProgressWithGuidance,
            HealerSpellId::MarkTaskBlockedWithFollowup,
        ],
        HealerScenario::InitScriptEnvironmentFailure => vec![
            HealerSpellId::UpdateProgressWithGuidance,
            HealerSpellId::MarkTaskBlockedWithFollowup,
        ],
        HealerScenario::SubtaskFailed => vec![
            HealerSpellId::RewindUncommittedChanges,
            HealerSpellId::UpdateProgressWithGuidance,
            HealerSpellId::MarkTaskBlockedWithFollowup,
        ],
        HealerScenario::VerificationFailed => vec![
            HealerSpellId::RewindUncommittedChanges,
            HealerSpellId::UpdateProgressWithGuidance,
        ],
        HealerScenario::RuntimeError => vec![
            HealerSpellId::RewindUncommittedChanges,
            HealerSpellId::UpdateProgressWithGuidance,
            HealerSpellId::MarkTaskBlockedWithFollowup,
        ],
        HealerScenario::SubtaskStuck => vec![
            HealerSpellId::UpdateProgressWithGuidance,
            HealerSpellId::MarkTaskBlockedWithFollowup,
        ],
    }
}

/// Options for spell planning
#[derive(Debug, Clone, Default)]
pub struct PlanSpellsOptions {
    /// Skip spells that require LLM invocation
    pub skip_llm_spells: bool,
    /// Maximum number of spells to return
    pub max_spells: Option<usize>,
    /// Restrict to spells that have an implementation registered
    pub available: Option<HashSet<HealerSpellId>>,
}

impl PlanSpellsOptions {
    /// Options implied by the configured mode
    pub fn for_mode(mode: HealerMode) -> Self {
        Self {
            skip_llm_spells: mode == HealerMode::Conservative,
            ..Self::default()
        }
    }

    pub fn with_available(mut self, available: impl IntoIterator<Item = HealerSpellId>) -> Self {
        self.available = Some(available.into_iter().collect());
        self
    }

    pub fn with_max_spells(mut self, max: usize) -> Self {
        self.max_spells = Some(max);
        self
    }
}

/// Plan which spells to execute for a scenario, in order.
pub fn plan_spells(
    scenario: HealerScenario,
    config: &HealerConfig,
    options: &PlanSpellsOptions,
) -> Vec<HealerSpellId> {
    let mut spells = get_scenario_spells(scenario);

    spells.retain(|s| config.spells.permits(s.as_str()));

    if options.skip_llm_spells {
        spells.retain(|s| !s.requires_llm());
    }

    if let Some(available) = &options.available {
        spells.retain(|s| available.contains(s));
    }

    if let Some(max) = options.max_spells {
        spells.truncate(max);
    }

    spells
}
