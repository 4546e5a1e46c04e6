//! Stuck detection
//!
//! A proactive scan over task/subtask snapshots and trajectory logs. It is
//! not gated by the policy engine and persists nothing; every scan is
//! recomputed from the inputs.

use crate::config::StuckDetectionConfig;
use crate::error::{HealerError, HealerResult};
use crate::patterns::{excerpt, is_error_indicator, normalize_error_pattern};
use crate::types::{Subtask, SubtaskStatus, TaskSnapshot, TaskStatus};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::warn;

// ============================================================================
// Types
// ============================================================================

/// Why something is considered stuck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StuckReason {
    TimeThresholdExceeded,
    ConsecutiveFailures,
}

impl StuckReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StuckReason::TimeThresholdExceeded => "time_threshold_exceeded",
            StuckReason::ConsecutiveFailures => "consecutive_failures",
        }
    }
}

impl std::fmt::Display for StuckReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recurring normalized error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailurePattern {
    pub pattern: String,
    pub occurrences: u32,
    /// Distinct sessions the pattern was seen in
    pub session_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckTaskInfo {
    pub task_id: String,
    pub task_title: String,
    pub reason: StuckReason,
    pub hours_stuck: f64,
    /// Patterns found in this task's trajectories
    pub failure_patterns: Vec<FailurePattern>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckSubtaskInfo {
    pub subtask_id: String,
    pub subtask_description: String,
    pub task_id: String,
    pub reason: StuckReason,
    /// Zero when the subtask never started
    pub hours_stuck: f64,
    pub failure_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckStats {
    pub tasks_scanned: u32,
    pub subtasks_scanned: u32,
    pub trajectories_scanned: u32,
    pub stuck_task_count: u32,
    pub stuck_subtask_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckDetectionResult {
    pub stuck_tasks: Vec<StuckTaskInfo>,
    pub stuck_subtasks: Vec<StuckSubtaskInfo>,
    /// Recurring patterns across all scanned trajectories
    pub failure_patterns: Vec<FailurePattern>,
    pub stats: StuckStats,
}

/// A subtask together with the id of the task that owns it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskWithTaskId {
    pub task_id: String,
    #[serde(flatten)]
    pub subtask: Subtask,
}

/// The parts of a trajectory the scan reads. Unknown fields are ignored, so
/// full trajectory files deserialize directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryLog {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub steps: Vec<TrajectoryLogStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryLogStep {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<TrajectoryObservation>,
}

impl TrajectoryLogStep {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            observation: None,
        }
    }

    pub fn with_observation(mut self, content: impl Into<String>) -> Self {
        let observation = self.observation.get_or_insert_with(TrajectoryObservation::default);
        observation.results.push(TrajectoryObservationResult {
            content: Some(content.into()),
        });
        self
    }

    fn texts(&self) -> impl Iterator<Item = &str> {
        self.observation
            .iter()
            .flat_map(|o| o.results.iter())
            .filter_map(|r| r.content.as_deref())
            .chain(std::iter::once(self.message.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryObservation {
    #[serde(default)]
    pub results: Vec<TrajectoryObservationResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryObservationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

// ============================================================================
// Detection
// ============================================================================

fn hours_since(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - then).num_seconds() as f64 / 3600.0
}

fn task_hours_stuck(
    task: &TaskSnapshot,
    config: &StuckDetectionConfig,
    now: DateTime<Utc>,
) -> Option<f64> {
    if task.status != TaskStatus::InProgress {
        return None;
    }
    let hours = hours_since(task.updated_at, now);
    (hours >= config.stuck_task_threshold_hours).then_some(hours)
}

fn subtask_stuck_at(
    subtask: &Subtask,
    config: &StuckDetectionConfig,
    now: DateTime<Utc>,
) -> Option<(StuckReason, f64)> {
    if !matches!(
        subtask.status,
        SubtaskStatus::InProgress | SubtaskStatus::Failed
    ) {
        return None;
    }

    let hours = subtask
        .started_at
        .map(|started| hours_since(started, now))
        .unwrap_or(0.0);

    if subtask.failures() >= config.min_consecutive_failures {
        return Some((StuckReason::ConsecutiveFailures, hours));
    }
    if subtask.started_at.is_some() && hours >= config.stuck_subtask_threshold_hours {
        return Some((StuckReason::TimeThresholdExceeded, hours));
    }
    None
}

/// Only `in_progress` tasks are evaluated
pub fn is_task_stuck_by_time(task: &TaskSnapshot, config: &StuckDetectionConfig) -> bool {
    task_hours_stuck(task, config, Utc::now()).is_some()
}

/// Only `in_progress` or `failed` subtasks are evaluated. The failure count
/// check wins over elapsed time.
pub fn is_subtask_stuck(subtask: &Subtask, config: &StuckDetectionConfig) -> Option<StuckReason> {
    subtask_stuck_at(subtask, config, Utc::now()).map(|(reason, _)| reason)
}

/// Recurring normalized error lines across trajectories, most frequent
/// first
pub fn extract_failure_patterns(
    trajectories: &[TrajectoryLog],
    config: &StuckDetectionConfig,
) -> Vec<FailurePattern> {
    let mut counts: HashMap<String, (u32, Vec<String>)> = HashMap::new();

    for trajectory in trajectories {
        for step in &trajectory.steps {
            for text in step.texts() {
                for line in text.lines().filter(|l| is_error_indicator(l)) {
                    let pattern = normalize_error_pattern(line);
                    if pattern.is_empty() {
                        continue;
                    }
                    let entry = counts.entry(pattern).or_default();
                    entry.0 += 1;
                    if !entry.1.contains(&trajectory.session_id) {
                        entry.1.push(trajectory.session_id.clone());
                    }
                }
            }
        }
    }

    let mut patterns: Vec<FailurePattern> = counts
        .into_iter()
        .filter(|(_, (occurrences, _))| *occurrences >= config.min_consecutive_failures)
        .map(|(pattern, (occurrences, session_ids))| FailurePattern {
            pattern,
            occurrences,
            session_ids,
        })
        .collect();
    patterns.sort_by(|a, b| {
        b.occurrences
            .cmp(&a.occurrences)
            .then_with(|| a.pattern.cmp(&b.pattern))
    });
    patterns
}

pub fn detect_stuck(
    tasks: &[TaskSnapshot],
    subtasks: &[SubtaskWithTaskId],
    trajectories: &[TrajectoryLog],
    config: &StuckDetectionConfig,
) -> StuckDetectionResult {
    detect_stuck_at(tasks, subtasks, trajectories, config, Utc::now())
}

/// [`detect_stuck`] against a fixed clock
pub fn detect_stuck_at(
    tasks: &[TaskSnapshot],
    subtasks: &[SubtaskWithTaskId],
    trajectories: &[TrajectoryLog],
    config: &StuckDetectionConfig,
    now: DateTime<Utc>,
) -> StuckDetectionResult {
    let failure_patterns = if config.scan_trajectories {
        extract_failure_patterns(trajectories, config)
    } else {
        Vec::new()
    };

    let stuck_tasks: Vec<StuckTaskInfo> = tasks
        .iter()
        .filter_map(|task| {
            let hours = task_hours_stuck(task, config, now)?;
            let sessions: HashSet<&str> = trajectories
                .iter()
                .filter(|t| t.task_id.as_deref() == Some(task.id.as_str()))
                .map(|t| t.session_id.as_str())
                .collect();
            let related = failure_patterns
                .iter()
                .filter(|p| p.session_ids.iter().any(|s| sessions.contains(s.as_str())))
                .cloned()
                .collect();
            Some(StuckTaskInfo {
                task_id: task.id.clone(),
                task_title: task.title.clone(),
                reason: StuckReason::TimeThresholdExceeded,
                hours_stuck: hours,
                failure_patterns: related,
            })
        })
        .collect();

    let stuck_subtasks: Vec<StuckSubtaskInfo> = subtasks
        .iter()
        .filter_map(|entry| {
            let (reason, hours) = subtask_stuck_at(&entry.subtask, config, now)?;
            Some(StuckSubtaskInfo {
                subtask_id: entry.subtask.id.clone(),
                subtask_description: entry.subtask.description.clone(),
                task_id: entry.task_id.clone(),
                reason,
                hours_stuck: hours,
                failure_count: entry.subtask.failures(),
            })
        })
        .collect();

    let stats = StuckStats {
        tasks_scanned: tasks.len() as u32,
        subtasks_scanned: subtasks.len() as u32,
        trajectories_scanned: if config.scan_trajectories {
            trajectories.len() as u32
        } else {
            0
        },
        stuck_task_count: stuck_tasks.len() as u32,
        stuck_subtask_count: stuck_subtasks.len() as u32,
    };

    StuckDetectionResult {
        stuck_tasks,
        stuck_subtasks,
        failure_patterns,
        stats,
    }
}

/// Human-readable digest of a scan
pub fn summarize_stuck_detection(result: &StuckDetectionResult) -> String {
    let mut lines = vec![format!(
        "Scanned {} tasks, {} subtasks, {} trajectories",
        result.stats.tasks_scanned, result.stats.subtasks_scanned, result.stats.trajectories_scanned
    )];

    if result.stuck_tasks.is_empty() && result.stuck_subtasks.is_empty() {
        lines.push("No stuck items detected.".to_string());
        return lines.join("\n");
    }

    if !result.stuck_tasks.is_empty() {
        lines.push(format!("\nStuck tasks ({}):", result.stuck_tasks.len()));
        for stuck in &result.stuck_tasks {
            lines.push(format!(
                "  - {}: {} ({:.1}h, {})",
                stuck.task_id, stuck.task_title, stuck.hours_stuck, stuck.reason
            ));
        }
    }

    if !result.stuck_subtasks.is_empty() {
        lines.push(format!("\nStuck subtasks ({}):", result.stuck_subtasks.len()));
        for stuck in &result.stuck_subtasks {
            lines.push(format!(
                "  - {}: {} ({}, {} failures)",
                stuck.subtask_id,
                excerpt(&stuck.subtask_description, 50),
                stuck.reason,
                stuck.failure_count
            ));
        }
    }

    if !result.failure_patterns.is_empty() {
        lines.push(format!(
            "\nRecurring failure patterns ({}):",
            result.failure_patterns.len()
        ));
        for pattern in &result.failure_patterns {
            lines.push(format!(
                "  - {}x in {} session(s): {}",
                pattern.occurrences,
                pattern.session_ids.len(),
                excerpt(&pattern.pattern, 100)
            ));
        }
    }

    lines.join("\n")
}

// ============================================================================
// Loading
// ============================================================================

/// Per-task subtask file: `{"taskId": "...", "subtasks": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskFile {
    pub task_id: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
}

/// Read task snapshots from a JSONL file. Lines that do not parse are
/// logged and skipped.
pub fn load_tasks_jsonl(path: impl AsRef<Path>) -> HealerResult<Vec<TaskSnapshot>> {
    let path = path.as_ref();
    let content =
        std::fs::read_to_string(path).map_err(|e| HealerError::storage(path, e.to_string()))?;
    let mut tasks = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TaskSnapshot>(line) {
            Ok(task) => tasks.push(task),
            Err(e) => warn!(path = %path.display(), line = index + 1, error = %e, "Skipping task line"),
        }
    }
    Ok(tasks)
}

/// Read every `*.json` [`SubtaskFile`] in a directory
pub fn load_subtasks_dir(dir: impl AsRef<Path>) -> HealerResult<Vec<SubtaskWithTaskId>> {
    let mut subtasks = Vec::new();
    for file in read_json_dir::<SubtaskFile>(dir.as_ref())? {
        subtasks.extend(file.subtasks.into_iter().map(|subtask| SubtaskWithTaskId {
            task_id: file.task_id.clone(),
            subtask,
        }));
    }
    Ok(subtasks)
}

/// Read every `*.json` trajectory in a directory
pub fn load_trajectories_dir(dir: impl AsRef<Path>) -> HealerResult<Vec<TrajectoryLog>> {
    read_json_dir(dir.as_ref())
}

fn read_json_dir<T: DeserializeOwned>(dir: &Path) -> HealerResult<Vec<T>> {
    let entries = std::fs::read_dir(dir).map_err(|e| HealerError::storage(dir, e.to_string()))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut items = Vec::with_capacity(paths.len());
    for path in paths {
        let content =
            std::fs::read_to_string(&path).map_err(|e| HealerError::storage(&path, e.to_string()))?;
        match serde_json::from_str(&content) {
            Ok(item) => items.push(item),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable file"),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn with_task(task_id: &str, subtask: Subtask) -> SubtaskWithTaskId {
        SubtaskWithTaskId {
            task_id: task_id.to_string(),
            subtask,
        }
    }

    fn trajectory(session: &str, task: &str, lines: &[&str]) -> TrajectoryLog {
        TrajectoryLog {
            session_id: session.to_string(),
            task_id: Some(task.to_string()),
            steps: lines
                .iter()
                .map(|l| TrajectoryLogStep::message("running tool").with_observation(*l))
                .collect(),
        }
    }

    #[test]
    fn test_task_stuck_only_when_in_progress() {
        let config = StuckDetectionConfig::default();
        let old = now() - Duration::hours(5);
        let tasks = vec![
            TaskSnapshot::new("oa-1", "Active", TaskStatus::InProgress).with_updated_at(old),
            TaskSnapshot::new("oa-2", "Open", TaskStatus::Open).with_updated_at(old),
            TaskSnapshot::new("oa-3", "Fresh", TaskStatus::InProgress)
                .with_updated_at(now() - Duration::hours(1)),
        ];
        let result = detect_stuck_at(&tasks, &[], &[], &config, now());
        assert_eq!(result.stuck_tasks.len(), 1);
        assert_eq!(result.stuck_tasks[0].task_id, "oa-1");
        assert_eq!(result.stuck_tasks[0].reason, StuckReason::TimeThresholdExceeded);
        assert!((result.stuck_tasks[0].hours_stuck - 5.0).abs() < 1e-6);
        assert_eq!(result.stats.tasks_scanned, 3);
        assert_eq!(result.stats.stuck_task_count, 1);
    }

    #[test]
    fn test_failed_subtask_with_three_failures_is_stuck() {
        let config = StuckDetectionConfig::default();
        let subtask = Subtask::new("sub-1", "x")
            .with_status(SubtaskStatus::Failed)
            .with_failure_count(3);
        assert_eq!(
            is_subtask_stuck(&subtask, &config),
            Some(StuckReason::ConsecutiveFailures)
        );

        // Recently started does not matter
        let recent = subtask.clone().with_started_at(Utc::now());
        assert_eq!(
            is_subtask_stuck(&recent, &config),
            Some(StuckReason::ConsecutiveFailures)
        );
    }

    #[test]
    fn test_subtask_time_threshold() {
        let config = StuckDetectionConfig::default();
        let subtasks = vec![
            with_task(
                "oa-1",
                Subtask::new("sub-1", "slow")
                    .with_status(SubtaskStatus::InProgress)
                    .with_started_at(now() - Duration::hours(3)),
            ),
            with_task(
                "oa-1",
                Subtask::new("sub-2", "never started").with_status(SubtaskStatus::InProgress),
            ),
            with_task(
                "oa-1",
                Subtask::new("sub-3", "done")
                    .with_status(SubtaskStatus::Done)
                    .with_failure_count(10),
            ),
        ];
        let result = detect_stuck_at(&[], &subtasks, &[], &config, now());
        assert_eq!(result.stuck_subtasks.len(), 1);
        assert_eq!(result.stuck_subtasks[0].subtask_id, "sub-1");
        assert_eq!(result.stuck_subtasks[0].reason, StuckReason::TimeThresholdExceeded);
        assert_eq!(result.stats.subtasks_scanned, 3);
    }

    #[test]
    fn test_extract_failure_patterns_normalizes_and_counts() {
        let config = StuckDetectionConfig::default();
        let trajectories = vec![
            trajectory(
                "s1",
                "oa-1",
                &[
                    "error at src/a.rs:1:2 in deadbeef00",
                    "error at src/a.rs:9:9 in cafebabe11",
                ],
            ),
            trajectory("s2", "oa-1", &["error at src/a.rs:3:4 in 0123456789", "Cannot find module x"]),
            trajectory("s3", "oa-2", &["Cannot find module x", "all good"]),
        ];
        let patterns = extract_failure_patterns(&trajectories, &config);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern, "error at src/a.rs:<LINE>:<COL> in <HASH>");
        assert_eq!(patterns[0].occurrences, 3);
        assert_eq!(patterns[0].session_ids, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn test_patterns_sorted_by_count() {
        let config = StuckDetectionConfig {
            min_consecutive_failures: 2,
            ..Default::default()
        };
        let trajectories = vec![trajectory(
            "s1",
            "oa-1",
            &["Error: a", "Error: b", "Error: b", "Error: a", "Error: b"],
        )];
        let patterns = extract_failure_patterns(&trajectories, &config);
        let names: Vec<_> = patterns.iter().map(|p| p.pattern.as_str()).collect();
        assert_eq!(names, vec!["Error: b", "Error: a"]);
    }

    #[test]
    fn test_stuck_task_carries_its_patterns() {
        let config = StuckDetectionConfig::default();
        let tasks = vec![TaskSnapshot::new("oa-1", "Active", TaskStatus::InProgress)
            .with_updated_at(now() - Duration::hours(8))];
        let trajectories = vec![trajectory("s1", "oa-1", &["Error: boom"; 3])];
        let result = detect_stuck_at(&tasks, &[], &trajectories, &config, now());
        assert_eq!(result.stuck_tasks[0].failure_patterns.len(), 1);
        assert_eq!(result.stats.trajectories_scanned, 1);

        let no_scan = StuckDetectionConfig {
            scan_trajectories: false,
            ..Default::default()
        };
        let result = detect_stuck_at(&tasks, &[], &trajectories, &no_scan, now());
        assert!(result.failure_patterns.is_empty());
        assert_eq!(result.stats.trajectories_scanned, 0);
    }

    #[test]
    fn test_summary() {
        let empty = StuckDetectionResult::default();
        assert!(summarize_stuck_detection(&empty).contains("No stuck items detected."));

        let config = StuckDetectionConfig::default();
        let tasks = vec![TaskSnapshot::new("oa-1", "Active task", TaskStatus::InProgress)
            .with_updated_at(now() - Duration::hours(6))];
        let subtasks = vec![with_task(
            "oa-1",
            Subtask::new("sub-1", "d".repeat(80))
                .with_status(SubtaskStatus::Failed)
                .with_failure_count(4),
        )];
        let result = detect_stuck_at(&tasks, &subtasks, &[], &config, now());
        let text = summarize_stuck_detection(&result);
        assert!(text.contains("Scanned 1 tasks, 1 subtasks, 0 trajectories"));
        assert!(text.contains("oa-1: Active task (6.0h, time_threshold_exceeded)"));
        assert!(text.contains(&format!("sub-1: {}...", "d".repeat(50))));
        assert!(text.contains("consecutive_failures, 4 failures"));
    }

    #[test]
    fn test_load_inputs_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = dir.path().join("tasks.jsonl");
        std::fs::write(
            &tasks,
            concat!(
                r#"{"id":"oa-1","title":"A","status":"in_progress","updatedAt":"2025-06-01T00:00:00Z"}"#,
                "\n\nnot json\n",
            ),
        )
        .unwrap();
        assert_eq!(load_tasks_jsonl(&tasks).unwrap().len(), 1);

        let subtasks = dir.path().join("subtasks");
        std::fs::create_dir_all(&subtasks).unwrap();
        std::fs::write(
            subtasks.join("oa-1.json"),
            r#"{"taskId":"oa-1","subtasks":[{"id":"sub-1","description":"x"},{"id":"sub-2","description":"y"}]}"#,
        )
        .unwrap();
        std::fs::write(subtasks.join("notes.txt"), "ignored").unwrap();
        let loaded = load_subtasks_dir(&subtasks).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|s| s.task_id == "oa-1"));

        let trajectories = dir.path().join("trajectories");
        std::fs::create_dir_all(&trajectories).unwrap();
        std::fs::write(
            trajectories.join("s1.json"),
            r#"{"session_id":"s1","agent":{"name":"x"},"steps":[{"step_id":1,"message":"Error: boom","observation":{"results":[{"content":"Error: boom"}]}}]}"#,
        )
        .unwrap();
        let loaded = load_trajectories_dir(&trajectories).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].steps[0].texts().count(), 2);

        assert!(load_subtasks_dir(dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_subtask_with_task_id_flattens() {
        let json = r#"{"taskId":"oa-1","id":"sub-1","description":"x","status":"failed","failureCount":3}"#;
        let parsed: SubtaskWithTaskId = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.task_id, "oa-1");
        assert_eq!(parsed.subtask.failures(), 3);
    }
}
