//! Per-invocation snapshot handed to spells

use crate::config::HealerConfig;
use crate::git::GitStatus;
use crate::heuristics::{HealerHeuristics, build_heuristics};
use crate::policy::HealerCounters;
use crate::scenario::HealerScenario;
use crate::types::{OrchestratorEvent, OrchestratorState, Subtask, TaskRef};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Everything a spell may read. Built fresh for every invocation and never
/// mutated afterwards; spells receive it by shared reference.
#[derive(Debug, Clone)]
pub struct HealerContext {
    pub project_root: PathBuf,
    pub config: HealerConfig,
    pub task: Option<TaskRef>,
    pub subtask: Option<Subtask>,
    pub session_id: String,
    /// Session id of the orchestrator trajectory this invocation hangs off
    pub parent_trajectory: Option<String>,
    /// Session id of the Healer's own trajectory for this invocation
    pub trajectory_session_id: Option<String>,
    pub git_status: GitStatus,
    pub heuristics: HealerHeuristics,
    /// Absent for invocations raised by the stuck detector
    pub event: Option<OrchestratorEvent>,
    pub state: OrchestratorState,
    pub error_output: Option<String>,
    pub counters: HealerCounters,
    pub invoked_at: DateTime<Utc>,
}

impl HealerContext {
    pub fn builder(project_root: impl AsRef<Path>, scenario: HealerScenario) -> HealerContextBuilder {
        HealerContextBuilder::new(project_root, scenario)
    }

    pub fn scenario(&self) -> HealerScenario {
        self.heuristics.scenario
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task
            .as_ref()
            .or(self.state.task.as_ref())
            .map(|t| t.id.as_str())
    }

    pub fn subtask_id(&self) -> Option<&str> {
        self.subtask.as_ref().map(|s| s.id.as_str())
    }
}

/// Builder for [`HealerContext`]
#[derive(Debug, Clone)]
pub struct HealerContextBuilder {
    project_root: PathBuf,
    scenario: HealerScenario,
    config: HealerConfig,
    task: Option<TaskRef>,
    subtask: Option<Subtask>,
    session_id: Option<String>,
    parent_trajectory: Option<String>,
    trajectory_session_id: Option<String>,
    git_status: GitStatus,
    heuristics: Option<HealerHeuristics>,
    event: Option<OrchestratorEvent>,
    state: OrchestratorState,
    error_output: Option<String>,
    counters: HealerCounters,
    invoked_at: Option<DateTime<Utc>>,
}

impl HealerContextBuilder {
    pub fn new(project_root: impl AsRef<Path>, scenario: HealerScenario) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            scenario,
            config: HealerConfig::default(),
            task: None,
            subtask: None,
            session_id: None,
            parent_trajectory: None,
            trajectory_session_id: None,
            git_status: GitStatus::clean(),
            heuristics: None,
            event: None,
            state: OrchestratorState::default(),
            error_output: None,
            counters: HealerCounters::default(),
            invoked_at: None,
        }
    }

    pub fn config(mut self, config: HealerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn task(mut self, task: TaskRef) -> Self {
        self.task = Some(task);
        self
    }

    pub fn subtask(mut self, subtask: Subtask) -> Self {
        self.subtask = Some(subtask);
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn parent_trajectory(mut self, session_id: impl Into<String>) -> Self {
        self.parent_trajectory = Some(session_id.into());
        self
    }

    pub fn trajectory_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.trajectory_session_id = Some(session_id.into());
        self
    }

    pub fn git_status(mut self, git_status: GitStatus) -> Self {
        self.git_status = git_status;
        self
    }

    pub fn heuristics(mut self, heuristics: HealerHeuristics) -> Self {
        self.heuristics = Some(heuristics);
        self
    }

    pub fn event(mut self, event: OrchestratorEvent) -> Self {
        self.event = Some(event);
        self
    }

    pub fn state(mut self, state: OrchestratorState) -> Self {
        self.state = state;
        self
    }

    pub fn error_output(mut self, error_output: impl Into<String>) -> Self {
        self.error_output = Some(error_output.into());
        self
    }

    pub fn counters(mut self, counters: HealerCounters) -> Self {
        self.counters = counters;
        self
    }

    pub fn invoked_at(mut self, invoked_at: DateTime<Utc>) -> Self {
        self.invoked_at = Some(invoked_at);
        self
    }

    /// Finish the snapshot. Without explicit heuristics they are derived
    /// from the error output and the subtask's failure count.
    pub fn build(self) -> HealerContext {
        let heuristics = match self.heuristics {
            Some(mut heuristics) => {
                heuristics.scenario = self.scenario;
                heuristics
            }
            None => build_heuristics(
                self.scenario,
                self.error_output.as_deref(),
                self.subtask.as_ref().map(Subtask::failures).unwrap_or(0),
                0,
                0,
            ),
        };

        let session_id = self
            .session_id
            .unwrap_or_else(|| self.state.session_id.clone());
        let task = self.task.or_else(|| self.state.task.clone());

        HealerContext {
            project_root: self.project_root,
            config: self.config,
            task,
            subtask: self.subtask,
            session_id,
            parent_trajectory: self.parent_trajectory,
            trajectory_session_id: self.trajectory_session_id,
            git_status: self.git_status,
            heuristics,
            event: self.event,
            state: self.state,
            error_output: self.error_output,
            counters: self.counters,
            invoked_at: self.invoked_at.unwrap_or_else(Utc::now),
        }
    }
}
