//! End-to-end Healer control flow
//!
//! event -> scenario -> policy gate -> dedup check -> spells -> outcome,
//! then the outcome is written back to the dedup store and the trajectory,
//! and the counters advance. One invocation at a time; `heal` takes
//! `&mut self`.

use crate::config::{HealerConfig, load_healer_config};
use crate::context::HealerContext;
use crate::dedup::{DedupStore, Fingerprint, HealingAttempt};
use crate::error::HealerResult;
use crate::git::GitStatus;
use crate::heuristics::build_heuristics;
use crate::outcome::HealerOutcome;
use crate::policy::{
    HealerCounters, HealerPolicyDecision, PlanSpellsOptions, increment_counters, plan_spells,
    should_run_for_scenario, should_run_healer,
};
use crate::scenario::{HealerScenario, event_subtask, get_error_output};
use crate::spells::{ExecuteOptions, SpellRegistry};
use crate::stuck::SubtaskWithTaskId;
use crate::summary::generate_healer_summary;
use crate::trajectory::HealerTrajectory;
use crate::types::{OrchestratorEvent, OrchestratorState, Subtask, TaskRef};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One event handed to the Healer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealerInvocation {
    pub event: OrchestratorEvent,

    #[serde(default)]
    pub state: OrchestratorState,

    /// Skips `git status` when provided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_status: Option<GitStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_trajectory: Option<String>,
}

impl HealerInvocation {
    pub fn new(event: OrchestratorEvent) -> Self {
        Self {
            event,
            state: OrchestratorState::default(),
            git_status: None,
            parent_trajectory: None,
        }
    }

    pub fn with_state(mut self, state: OrchestratorState) -> Self {
        self.state = state;
        self
    }

    pub fn with_git_status(mut self, git_status: GitStatus) -> Self {
        self.git_status = Some(git_status);
        self
    }

    pub fn with_parent_trajectory(mut self, session_id: impl Into<String>) -> Self {
        self.parent_trajectory = Some(session_id.into());
        self
    }
}

/// Artifacts of the most recent invocation that ran spells
#[derive(Debug, Clone)]
pub struct HealerRun {
    pub context: HealerContext,
    pub trajectory: HealerTrajectory,
    /// Markdown report, see [`generate_healer_summary`]
    pub summary: String,
}

/// Everything resolved before the dedup check
struct Prepared {
    scenario: HealerScenario,
    event: Option<OrchestratorEvent>,
    task: Option<TaskRef>,
    subtask: Option<Subtask>,
    state: OrchestratorState,
    error_output: Option<String>,
    git_status: Option<GitStatus>,
    parent_trajectory: Option<String>,
}

/// The Healer service for one project root
pub struct Healer {
    project_root: PathBuf,
    config: HealerConfig,
    registry: SpellRegistry,
    dedup: DedupStore,
    counters: HealerCounters,
    record_trajectories: bool,
    last_run: Option<HealerRun>,
}

impl Healer {
    pub fn new(project_root: impl AsRef<Path>, config: HealerConfig) -> Self {
        let project_root = project_root.as_ref().to_path_buf();
        let dedup = DedupStore::for_project(&project_root).with_ttl_hours(config.dedup_ttl_hours);
        Self {
            project_root,
            config,
            registry: SpellRegistry::new(),
            dedup,
            counters: HealerCounters::new(),
            record_trajectories: true,
            last_run: None,
        }
    }

    /// Load the project's Healer config and build a service for it
    pub fn for_project(project_root: impl AsRef<Path>) -> HealerResult<Self> {
        let config = load_healer_config(project_root.as_ref())?;
        Ok(Self::new(project_root, config))
    }

    pub fn with_registry(mut self, registry: SpellRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_dedup_store(mut self, dedup: DedupStore) -> Self {
        self.dedup = dedup;
        self
    }

    /// Whether trajectories are written under `.openagents/trajectories`
    pub fn with_trajectories(mut self, record: bool) -> Self {
        self.record_trajectories = record;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn config(&self) -> &HealerConfig {
        &self.config
    }

    pub fn counters(&self) -> &HealerCounters {
        &self.counters
    }

    /// Start a new session: counters go back to zero, dedup records stay
    pub fn reset_counters(&mut self) {
        self.counters = HealerCounters::new();
    }

    pub fn registry_mut(&mut self) -> &mut SpellRegistry {
        &mut self.registry
    }

    pub fn dedup_mut(&mut self) -> &mut DedupStore {
        &mut self.dedup
    }

    pub fn last_run(&self) -> Option<&HealerRun> {
        self.last_run.as_ref()
    }

    /// Handle one orchestrator event.
    ///
    /// Always yields an outcome; `Err` is reserved for storage failures.
    pub async fn heal(&mut self, invocation: HealerInvocation) -> HealerResult<HealerOutcome> {
        let HealerInvocation {
            event,
            state,
            git_status,
            parent_trajectory,
        } = invocation;

        let subtask = event_subtask(&event).cloned();
        let subtask_id = subtask.as_ref().map(|s| s.id.clone());
        let decision =
            should_run_healer(&event, &self.config, &self.counters, subtask_id.as_deref());
        let Some(scenario) = accepted(&decision) else {
            debug!(event = event.kind(), reason = %decision.reason, "Healer not triggered");
            return Ok(HealerOutcome::skipped(decision.scenario, decision.reason));
        };
        info!(scenario = %scenario, event = event.kind(), reason = %decision.reason, "Healer triggered");

        let error_output = get_error_output(&event);
        self.run(Prepared {
            scenario,
            task: state.task.clone(),
            event: Some(event),
            subtask,
            state,
            error_output,
            git_status,
            parent_trajectory,
        })
        .await
    }

    /// Handle a subtask flagged by the stuck detector. Gated like an event
    /// (`onStuckSubtask` and the invocation ceilings apply).
    pub async fn heal_stuck(
        &mut self,
        stuck: &SubtaskWithTaskId,
        state: OrchestratorState,
    ) -> HealerResult<HealerOutcome> {
        let scenario = HealerScenario::SubtaskStuck;
        let subtask_id = stuck.subtask.id.as_str();
        let decision =
            should_run_for_scenario(scenario, &self.config, &self.counters, Some(subtask_id));
        if !decision.run {
            debug!(subtask = subtask_id, reason = %decision.reason, "Stuck subtask not healed");
            return Ok(HealerOutcome::skipped(Some(scenario), decision.reason));
        }
        info!(scenario = %scenario, subtask = subtask_id, "Healer triggered for stuck subtask");

        let task = match &state.task {
            Some(task) if task.id == stuck.task_id => task.clone(),
            _ => TaskRef {
                id: stuck.task_id.clone(),
                title: stuck.task_id.clone(),
                description: None,
            },
        };
        let error_output = stuck
            .subtask
            .error
            .clone()
            .or_else(|| stuck.subtask.last_failure_reason.clone())
            .filter(|e| !e.trim().is_empty());

        self.run(Prepared {
            scenario,
            event: None,
            task: Some(task),
            subtask: Some(stuck.subtask.clone()),
            state,
            error_output,
            git_status: None,
            parent_trajectory: None,
        })
        .await
    }

    async fn run(&mut self, prepared: Prepared) -> HealerResult<HealerOutcome> {
        let scenario = prepared.scenario;
        let subtask_id = prepared.subtask.as_ref().map(|s| s.id.clone());
        let task_id = prepared
            .task
            .as_ref()
            .or(prepared.state.task.as_ref())
            .map(|t| t.id.clone());

        let fingerprint = Fingerprint::compute(
            scenario,
            task_id.as_deref(),
            subtask_id.as_deref(),
            prepared.error_output.as_deref().unwrap_or(""),
        );

        match self.dedup.check(&fingerprint)? {
            Some(previous) if self.dedup.is_spent(&previous) => {
                warn!(
                    fingerprint = %fingerprint,
                    scenario = %scenario,
                    resolved_at = %previous.timestamp,
                    "Failure already resolved, skipping"
                );
                increment_counters(&mut self.counters, None);
                return Ok(HealerOutcome::skipped(
                    Some(scenario),
                    format!("Already resolved at {} ({})", previous.timestamp, fingerprint),
                )
                .with_fingerprint(fingerprint.key));
            }
            Some(previous) => {
                debug!(fingerprint = %fingerprint, previous = %previous.outcome, "Retrying known failure");
            }
            None => debug!(fingerprint = %fingerprint, "Dedup miss"),
        }

        let previous_attempts = self.dedup.related(&fingerprint)?.len() as u32;
        let distinct_signatures = self.dedup.distinct_signatures(&fingerprint)?;

        let git_status = match prepared.git_status {
            Some(status) => status,
            None => GitStatus::capture(&self.project_root).unwrap_or_else(|e| {
                warn!(error = %e, "Could not capture git status, assuming clean tree");
                GitStatus::clean()
            }),
        };

        let heuristics = build_heuristics(
            scenario,
            prepared.error_output.as_deref(),
            prepared.subtask.as_ref().map(Subtask::failures).unwrap_or(0),
            previous_attempts,
            distinct_signatures,
        );

        let mut trajectory = HealerTrajectory::new();
        if let Some(parent) = &prepared.parent_trajectory {
            trajectory = trajectory.with_parent(parent.clone());
        }

        let mut builder = HealerContext::builder(&self.project_root, scenario)
            .config(self.config.clone())
            .state(prepared.state)
            .git_status(git_status)
            .heuristics(heuristics)
            .counters(self.counters.clone());
        if self.record_trajectories {
            builder = builder.trajectory_session_id(trajectory.session_id.clone());
        }
        if let Some(event) = prepared.event {
            builder = builder.event(event);
        }
        if let Some(task) = prepared.task {
            builder = builder.task(task);
        }
        if let Some(subtask) = prepared.subtask {
            builder = builder.subtask(subtask);
        }
        if let Some(error) = prepared.error_output {
            builder = builder.error_output(error);
        }
        if let Some(parent) = prepared.parent_trajectory {
            builder = builder.parent_trajectory(parent);
        }
        let ctx = builder.build();

        let options = PlanSpellsOptions::for_mode(self.config.mode).with_available(self.registry.ids());
        let planned: Vec<String> = plan_spells(scenario, &self.config, &options)
            .iter()
            .map(ToString::to_string)
            .collect();
        debug!(scenario = %scenario, spells = ?planned, "Planned spells");

        trajectory.record_start(scenario, &planned);
        let executions = self
            .registry
            .execute_spells_observed(
                planned.as_slice(),
                &ctx,
                ExecuteOptions {
                    continue_on_failure: self.config.continue_on_failure,
                },
                &mut trajectory,
            )
            .await;

        // Spells may have touched the workspace; charge the quota before any
        // write can fail.
        increment_counters(&mut self.counters, subtask_id.as_deref());

        let mut outcome =
            HealerOutcome::from_executions(scenario, &executions).with_fingerprint(fingerprint.key.clone());
        if self.record_trajectories {
            outcome = outcome.with_trajectory_session_id(trajectory.session_id.clone());
        }
        trajectory.record_complete(&outcome);
        info!(
            scenario = %scenario,
            status = %outcome.status,
            spells_tried = outcome.spells_tried.len(),
            spells_succeeded = outcome.spells_succeeded.len(),
            fingerprint = %fingerprint,
            "Healer finished"
        );

        if self.record_trajectories {
            match trajectory.write_to(&self.project_root) {
                Ok(path) => debug!(path = %path.display(), "Wrote Healer trajectory"),
                Err(e) => {
                    warn!(error = %e, session = %trajectory.session_id, "Could not write Healer trajectory");
                    outcome.trajectory_session_id = None;
                }
            }
        }
        self.dedup.record(HealingAttempt::new(&fingerprint, &outcome))?;

        let summary =
            generate_healer_summary(&ctx, &outcome.spells_tried, &outcome.spells_succeeded);
        self.last_run = Some(HealerRun {
            context: ctx,
            trajectory,
            summary,
        });

        Ok(outcome)
    }
}

fn accepted(decision: &HealerPolicyDecision) -> Option<HealerScenario> {
    decision.scenario.filter(|_| decision.run)
}
