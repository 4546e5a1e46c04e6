//! Healer: self-healing remediation for the agent orchestrator
//!
//! When the orchestrator emits a failure-shaped event the Healer classifies
//! it into a [`HealerScenario`], asks the policy gate whether to act, checks
//! the dedup store so an already resolved failure is not attempted again,
//! then runs a bounded sequence of recovery spells and records the outcome.
//!
//! ```no_run
//! use healer::{Healer, HealerInvocation, OrchestratorEvent, Subtask};
//!
//! # async fn run() -> healer::HealerResult<()> {
//! let mut healer = Healer::for_project(".")?;
//! let outcome = healer
//!     .heal(HealerInvocation::new(OrchestratorEvent::SubtaskFailed {
//!         subtask: Subtask::new("sub-1", "Add the parser"),
//!         error: "error[E0425]: cannot find value `x` in this scope".to_string(),
//!     }))
//!     .await?;
//! println!("{}", outcome.status);
//! # Ok(())
//! # }
//! ```
//!
//! The stuck detector ([`detect_stuck`]) is a separate, read-only scan over
//! task and subtask snapshots and trajectory logs.

pub mod config;
pub mod context;
pub mod dedup;
pub mod error;
pub mod git;
pub mod heuristics;
pub mod outcome;
pub mod patterns;
pub mod policy;
pub mod scenario;
pub mod service;
pub mod spells;
pub mod stuck;
pub mod summary;
pub mod trajectory;
pub mod types;

pub use config::{
    HealerConfig, HealerMode, HealerScenarioConfig, HealerSpellsConfig, StuckDetectionConfig,
    load_healer_config,
};
pub use context::{HealerContext, HealerContextBuilder};
pub use dedup::{DedupStore, Fingerprint, HealingAttempt};
pub use error::{HealerError, HealerResult};
pub use git::GitStatus;
pub use heuristics::{HealerHeuristics, build_heuristics};
pub use outcome::{HealerOutcome, HealerOutcomeStatus, determine_outcome_status};
pub use patterns::{
    detect_error_patterns, is_error_indicator, normalize_error_pattern, normalize_error_text,
};
pub use policy::{
    HealerCounters, HealerPolicyDecision, PlanSpellsOptions, get_scenario_spells,
    increment_counters, is_scenario_enabled, plan_spells, should_run_for_scenario,
    should_run_healer,
};
pub use scenario::{
    HealerScenario, event_subtask_id, get_error_output, is_healable_init_failure,
    map_event_to_scenario,
};
pub use service::{Healer, HealerInvocation, HealerRun};
pub use spells::{
    ExecuteOptions, HealerSpellId, HealerSpellResult, Spell, SpellExecution, SpellObserver,
    SpellRegistry, TaskStoreRequest, filter_allowed_spells, is_spell_allowed,
};
pub use stuck::{
    FailurePattern, StuckDetectionResult, StuckReason, StuckStats, StuckSubtaskInfo,
    StuckTaskInfo, SubtaskWithTaskId, TrajectoryLog, TrajectoryLogStep, detect_stuck,
    extract_failure_patterns, is_subtask_stuck, is_task_stuck_by_time, summarize_stuck_detection,
};
pub use summary::generate_healer_summary;
pub use trajectory::{HealerStep, HealerStepKind, HealerTrajectory};
pub use types::{
    InitScriptFailureType, InitScriptResult, OrchestratorEvent, OrchestratorPhase,
    OrchestratorState, SubagentResult, Subtask, SubtaskStatus, TaskRef, TaskSnapshot, TaskStatus,
};
