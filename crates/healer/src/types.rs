//! Orchestrator shapes the Healer reads
//!
//! These mirror the orchestrator's event feed and task/subtask snapshots at
//! the boundary. The Healer never owns or mutates any of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Tasks and Subtasks
// ============================================================================

/// Task status as reported by the task store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Open,
    InProgress,
    Blocked,
    Closed,
    CommitPending,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Closed => "closed",
            TaskStatus::CommitPending => "commit_pending",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TaskStatus::Open),
            "in_progress" => Ok(TaskStatus::InProgress),
            "blocked" => Ok(TaskStatus::Blocked),
            "closed" => Ok(TaskStatus::Closed),
            "commit_pending" => Ok(TaskStatus::CommitPending),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// Read-only view of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    pub updated_at: DateTime<Utc>,
}

impl TaskSnapshot {
    pub fn new(id: impl Into<String>, title: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            status,
            updated_at: Utc::now(),
        }
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Verified,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub status: SubtaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of consecutive failures on this subtask
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
}

impl Subtask {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: SubtaskStatus::Pending,
            started_at: None,
            error: None,
            failure_count: None,
            last_failure_reason: None,
        }
    }

    pub fn with_status(mut self, status: SubtaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self
    }

    pub fn with_failure_count(mut self, count: u32) -> Self {
        self.failure_count = Some(count);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn failures(&self) -> u32 {
        self.failure_count.unwrap_or(0)
    }
}

/// Result reported by a subagent when a subtask completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentResult {
    pub success: bool,
    pub subtask_id: String,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub turns: u32,
}

// ============================================================================
// Init Script
// ============================================================================

/// Structured failure types for init script errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitScriptFailureType {
    TypecheckFailed,
    TestFailed,
    NetworkError,
    DiskFull,
    PermissionDenied,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitScriptResult {
    #[serde(default)]
    pub ran: bool,
    /// false when the script exited with 1 (abort)
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<InitScriptFailureType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_self_heal: Option<bool>,
}

impl InitScriptResult {
    pub fn failed(failure_type: InitScriptFailureType, output: impl Into<String>) -> Self {
        Self {
            ran: true,
            success: false,
            exit_code: Some(1),
            output: Some(output.into()),
            error: None,
            failure_type: Some(failure_type),
            can_self_heal: None,
        }
    }

    pub fn passed() -> Self {
        Self {
            ran: true,
            success: true,
            exit_code: Some(0),
            ..Default::default()
        }
    }
}

// ============================================================================
// Orchestrator State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorPhase {
    #[default]
    Idle,
    Orienting,
    SelectingTask,
    Decomposing,
    ExecutingSubtask,
    Verifying,
    Committing,
    UpdatingTask,
    Logging,
    Done,
    Failed,
}

/// Minimal task reference carried in events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Snapshot of the orchestrator at the moment an event fired
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorState {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskRef>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub phase: OrchestratorPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Event Feed
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OrchestratorEvent {
    SessionStart {
        session_id: String,
        timestamp: String,
    },
    InitScriptStart {
        path: String,
    },
    InitScriptComplete {
        result: InitScriptResult,
    },
    TaskSelected {
        task: TaskRef,
    },
    TaskDecomposed {
        subtasks: Vec<Subtask>,
    },
    SubtaskStart {
        subtask: Subtask,
    },
    SubtaskComplete {
        subtask: Subtask,
        result: SubagentResult,
    },
    SubtaskFailed {
        subtask: Subtask,
        error: String,
    },
    VerificationStart {
        command: String,
    },
    VerificationComplete {
        command: String,
        passed: bool,
        output: String,
    },
    CommitCreated {
        sha: String,
        message: String,
    },
    SessionComplete {
        success: bool,
        summary: String,
    },
    Error {
        phase: OrchestratorPhase,
        error: String,
    },
    /// Any event type this build does not know about
    #[serde(other)]
    Unknown,
}

impl OrchestratorEvent {
    /// Wire name of the event, matching the serde tag
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorEvent::SessionStart { .. } => "session_start",
            OrchestratorEvent::InitScriptStart { .. } => "init_script_start",
            OrchestratorEvent::InitScriptComplete { .. } => "init_script_complete",
            OrchestratorEvent::TaskSelected { .. } => "task_selected",
            OrchestratorEvent::TaskDecomposed { .. } => "task_decomposed",
            OrchestratorEvent::SubtaskStart { .. } => "subtask_start",
            OrchestratorEvent::SubtaskComplete { .. } => "subtask_complete",
            OrchestratorEvent::SubtaskFailed { .. } => "subtask_failed",
            OrchestratorEvent::VerificationStart { .. } => "verification_start",
            OrchestratorEvent::VerificationComplete { .. } => "verification_complete",
            OrchestratorEvent::CommitCreated { .. } => "commit_created",
            OrchestratorEvent::SessionComplete { .. } => "session_complete",
            OrchestratorEvent::Error { .. } => "error",
            OrchestratorEvent::Unknown => "unknown",
        }
    }
}
