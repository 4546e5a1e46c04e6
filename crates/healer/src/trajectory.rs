//! Immutable step log of one Healer invocation

use crate::config::OPENAGENTS_DIR;
use crate::error::{HealerError, HealerResult};
use crate::outcome::HealerOutcome;
use crate::scenario::HealerScenario;
use crate::spells::{HealerSpellResult, SpellObserver};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

/// Agent name recorded on every Healer trajectory
pub const HEALER_AGENT: &str = "healer";

/// Kind of a Healer trajectory step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealerStepKind {
    HealerStart,
    HealerSpellStart,
    HealerSpellComplete,
    HealerComplete,
}

/// A single Healer trajectory step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealerStep {
    /// Ordinal index of the step (starting from 1)
    pub step_id: i64,

    /// ISO 8601 timestamp
    pub timestamp: DateTime<Utc>,

    pub kind: HealerStepKind,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// Step log for one invocation, linkable into the orchestrator trajectory
/// through `parent_session_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealerTrajectory {
    pub session_id: String,
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    pub steps: Vec<HealerStep>,
}

impl HealerTrajectory {
    pub fn new() -> Self {
        Self {
            session_id: format!("healer-{}", uuid::Uuid::new_v4()),
            agent: HEALER_AGENT.to_string(),
            parent_session_id: None,
            steps: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent_session_id: impl Into<String>) -> Self {
        self.parent_session_id = Some(parent_session_id.into());
        self
    }

    fn push(&mut self, kind: HealerStepKind, message: String, extra: Option<Value>) {
        let step_id = self.steps.last().map(|s| s.step_id + 1).unwrap_or(1);
        self.steps.push(HealerStep {
            step_id,
            timestamp: Utc::now(),
            kind,
            message,
            extra,
        });
    }

    pub fn record_start(&mut self, scenario: HealerScenario, planned: &[String]) {
        self.push(
            HealerStepKind::HealerStart,
            format!("Healer invoked for {}", scenario),
            Some(json!({ "scenario": scenario, "planned": planned })),
        );
    }

    pub fn record_spell_start(&mut self, spell_id: &str) {
        self.push(
            HealerStepKind::HealerSpellStart,
            format!("Casting {}", spell_id),
            Some(json!({ "spell": spell_id })),
        );
    }

    pub fn record_spell_complete(&mut self, spell_id: &str, result: &HealerSpellResult) {
        self.push(
            HealerStepKind::HealerSpellComplete,
            result.summary.clone(),
            Some(json!({
                "spell": spell_id,
                "success": result.success,
                "changesApplied": result.changes_applied,
                "error": result.error,
            })),
        );
    }

    pub fn record_complete(&mut self, outcome: &HealerOutcome) {
        self.push(
            HealerStepKind::HealerComplete,
            outcome.summary.clone(),
            Some(json!({
                "status": outcome.status,
                "spellsTried": outcome.spells_tried,
                "spellsSucceeded": outcome.spells_succeeded,
            })),
        );
    }

    pub fn to_json(&self) -> HealerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write to `<root>/.openagents/trajectories/healer/<session>.json`
    pub fn write_to(&self, project_root: impl AsRef<Path>) -> HealerResult<PathBuf> {
        let dir = trajectory_dir(project_root);
        std::fs::create_dir_all(&dir).map_err(|e| HealerError::storage(&dir, e.to_string()))?;
        let path = dir.join(format!("{}.json", self.session_id));
        std::fs::write(&path, self.to_json()?)
            .map_err(|e| HealerError::storage(&path, e.to_string()))?;
        Ok(path)
    }
}

impl SpellObserver for HealerTrajectory {
    fn spell_started(&mut self, spell_id: &str) {
        self.record_spell_start(spell_id);
    }

    fn spell_completed(&mut self, spell_id: &str, result: &HealerSpellResult) {
        self.record_spell_complete(spell_id, result);
    }
}

impl Default for HealerTrajectory {
    fn default() -> Self {
        Self::new()
    }
}

pub fn trajectory_dir(project_root: impl AsRef<Path>) -> PathBuf {
    project_root
        .as_ref()
        .join(OPENAGENTS_DIR)
        .join("trajectories")
        .join(HEALER_AGENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_steps_are_ordered() {
        let mut trajectory = HealerTrajectory::new().with_parent("orch-1");
        trajectory.record_start(
            HealerScenario::SubtaskFailed,
            &["rewind_uncommitted_changes".to_string()],
        );
        trajectory.record_spell_start("rewind_uncommitted_changes");
        trajectory.record_spell_complete(
            "rewind_uncommitted_changes",
            &HealerSpellResult::success("clean"),
        );
        trajectory.record_complete(&HealerOutcome::skipped(None, "done"));

        let kinds: Vec<_> = trajectory.steps.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                HealerStepKind::HealerStart,
                HealerStepKind::HealerSpellStart,
                HealerStepKind::HealerSpellComplete,
                HealerStepKind::HealerComplete,
            ]
        );
        let ids: Vec<_> = trajectory.steps.iter().map(|s| s.step_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(trajectory.steps.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(trajectory.parent_session_id.as_deref(), Some("orch-1"));
    }

    #[test]
    fn test_json_uses_snake_case_kinds() {
        let mut trajectory = HealerTrajectory::new();
        trajectory.record_start(HealerScenario::RuntimeError, &[]);
        let json = trajectory.to_json().unwrap();
        assert!(json.contains("\"healer_start\""));
        assert!(json.contains("\"RuntimeError\""));
    }

    #[test]
    fn test_write_to_project() {
        let dir = tempdir().unwrap();
        let trajectory = HealerTrajectory::new();
        let path = trajectory.write_to(dir.path()).unwrap();
        assert!(path.starts_with(trajectory_dir(dir.path())));
        let parsed: HealerTrajectory =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed, trajectory);
    }
}
