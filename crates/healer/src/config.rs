//! Healer configuration
//!
//! The Healer section lives under the `healer` key of
//! `.openagents/project.json`. Keys are camelCase and every field has a
//! default so a partial (or absent) section is valid.

use crate::error::{HealerError, HealerResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory (relative to the project root) holding OpenAgents state
pub const OPENAGENTS_DIR: &str = ".openagents";

/// Project config file name inside [`OPENAGENTS_DIR`]
pub const PROJECT_CONFIG_FILE: &str = "project.json";

/// How much latitude the Healer has when picking spells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum HealerMode {
    /// Run any registered spell, including LLM-backed ones
    Auto,
    /// Only deterministic, non-LLM spells
    #[default]
    Conservative,
}

/// Healer scenario configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealerScenarioConfig {
    /// Heal on initialization failure
    #[serde(default = "default_true")]
    pub on_init_failure: bool,

    /// Heal on verification failure
    #[serde(default = "default_true")]
    pub on_verification_failure: bool,

    /// Heal on subtask failure
    #[serde(default = "default_true")]
    pub on_subtask_failure: bool,

    /// Heal on runtime error
    #[serde(default = "default_true")]
    pub on_runtime_error: bool,

    /// Heal on stuck subtask (reserved for the stuck detector path)
    #[serde(default)]
    pub on_stuck_subtask: bool,
}

impl Default for HealerScenarioConfig {
    fn default() -> Self {
        Self {
            on_init_failure: true,
            on_verification_failure: true,
            on_subtask_failure: true,
            on_runtime_error: true,
            on_stuck_subtask: false,
        }
    }
}

/// Spell allow/deny lists
///
/// When `allowed` is present it is the only source of truth and `forbidden`
/// is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealerSpellsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forbidden: Option<Vec<String>>,
}

impl HealerSpellsConfig {
    /// Whether a spell id passes the allow/deny lists
    pub fn permits(&self, spell_id: &str) -> bool {
        if let Some(allowed) = &self.allowed {
            return allowed.iter().any(|id| id == spell_id);
        }
        match &self.forbidden {
            Some(forbidden) => !forbidden.iter().any(|id| id == spell_id),
            None => true,
        }
    }
}

/// Healer configuration (self-healing)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealerConfig {
    /// Whether healer is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Healer mode (aggressiveness)
    #[serde(default)]
    pub mode: HealerMode,

    /// Healing scenarios
    #[serde(default)]
    pub scenarios: HealerScenarioConfig,

    /// Spell filtering
    #[serde(default)]
    pub spells: HealerSpellsConfig,

    /// Maximum invocations per session
    #[serde(default = "default_max_invocations_session")]
    pub max_invocations_per_session: u32,

    /// Maximum invocations per subtask
    #[serde(default = "default_max_invocations_subtask")]
    pub max_invocations_per_subtask: u32,

    /// Hours before considering a subtask stuck
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold_hours: u32,

    /// Resolved dedup records older than this are retried. Absent means
    /// a resolved fingerprint stays spent until manually reset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_ttl_hours: Option<f64>,

    /// Keep running the spell plan after a spell fails
    #[serde(default)]
    pub continue_on_failure: bool,
}

impl Default for HealerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: HealerMode::Conservative,
            scenarios: HealerScenarioConfig::default(),
            spells: HealerSpellsConfig::default(),
            max_invocations_per_session: default_max_invocations_session(),
            max_invocations_per_subtask: default_max_invocations_subtask(),
            stuck_threshold_hours: default_stuck_threshold(),
            dedup_ttl_hours: None,
            continue_on_failure: false,
        }
    }
}

/// Thresholds for the stuck detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckDetectionConfig {
    /// Hours before an in-progress task is considered stuck
    #[serde(default = "default_task_hours")]
    pub stuck_task_threshold_hours: f64,

    /// Hours before an in-progress subtask is considered stuck
    #[serde(default = "default_subtask_hours")]
    pub stuck_subtask_threshold_hours: f64,

    /// Failures (or pattern occurrences) needed to flag something
    #[serde(default = "default_min_failures")]
    pub min_consecutive_failures: u32,

    /// Whether to scan trajectories for recurring failure patterns
    #[serde(default = "default_true")]
    pub scan_trajectories: bool,
}

impl Default for StuckDetectionConfig {
    fn default() -> Self {
        Self {
            stuck_task_threshold_hours: default_task_hours(),
            stuck_subtask_threshold_hours: default_subtask_hours(),
            min_consecutive_failures: default_min_failures(),
            scan_trajectories: true,
        }
    }
}

impl StuckDetectionConfig {
    /// Seed the subtask threshold from the project's Healer config
    pub fn from_healer_config(config: &HealerConfig) -> Self {
        Self {
            stuck_subtask_threshold_hours: f64::from(config.stuck_threshold_hours),
            ..Self::default()
        }
    }
}

/// Path of the project config file for a project root
pub fn project_config_path(project_root: impl AsRef<Path>) -> PathBuf {
    project_root
        .as_ref()
        .join(OPENAGENTS_DIR)
        .join(PROJECT_CONFIG_FILE)
}

/// Load the `healer` section of the project config.
///
/// A missing file or missing section yields defaults.
pub fn load_healer_config(project_root: impl AsRef<Path>) -> HealerResult<HealerConfig> {
    let path = project_config_path(project_root);
    if !path.exists() {
        return Ok(HealerConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let mut root: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| HealerError::config(format!("{}: {}", path.display(), e)))?;

    match root.get_mut("healer").map(serde_json::Value::take) {
        Some(section) => serde_json::from_value(section)
            .map_err(|e| HealerError::config(format!("{}: healer: {}", path.display(), e))),
        None => Ok(HealerConfig::default()),
    }
}

fn default_true() -> bool {
    true
}

fn default_max_invocations_session() -> u32 {
    2
}

fn default_max_invocations_subtask() -> u32 {
    1
}

fn default_stuck_threshold() -> u32 {
    2
}

fn default_task_hours() -> f64 {
    4.0
}

fn default_subtask_hours() -> f64 {
    2.0
}

fn default_min_failures() -> u32 {
    3
}
