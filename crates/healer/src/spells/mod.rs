//! Spells: controlled recovery operations
//!
//! A spell reads a [`HealerContext`] and reports a [`HealerSpellResult`].
//! Failures never escape as `Err`; they are captured into the result so the
//! executor can decide whether to continue.

mod mark_blocked;
mod progress;
mod rewind;
mod tasks_doctor;

pub use mark_blocked::{MarkTaskBlockedSpell, build_block_reason, build_followup_description};
pub use progress::{PROGRESS_FILE, UpdateProgressSpell, build_progress_guidance};
pub use rewind::RewindUncommittedChangesSpell;
pub use tasks_doctor::{TASKS_FILE, TasksDoctorSpell, check_tasks_jsonl};

use crate::context::HealerContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Spell Ids
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealerSpellId {
    /// git restore + git clean -fd
    RewindUncommittedChanges,
    /// git reset to last known-good commit
    RewindToLastGreenCommit,
    /// Prepare a block reason and follow-up task
    MarkTaskBlockedWithFollowup,
    /// Fall back to a minimal subagent
    RetryWithMinimalSubagent,
    /// Resume the previous agent session for recovery
    RetryWithClaudeCodeResume,
    FixTypecheckErrors,
    FixTestErrors,
    /// Append guidance to progress.md
    UpdateProgressWithGuidance,
    /// Validate tasks.jsonl structure
    RunTasksDoctorLikeChecks,
}

impl HealerSpellId {
    pub const ALL: [HealerSpellId; 9] = [
        HealerSpellId::RewindUncommittedChanges,
        HealerSpellId::RewindToLastGreenCommit,
        HealerSpellId::MarkTaskBlockedWithFollowup,
        HealerSpellId::RetryWithMinimalSubagent,
        HealerSpellId::RetryWithClaudeCodeResume,
        HealerSpellId::FixTypecheckErrors,
        HealerSpellId::FixTestErrors,
        HealerSpellId::UpdateProgressWithGuidance,
        HealerSpellId::RunTasksDoctorLikeChecks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HealerSpellId::RewindUncommittedChanges => "rewind_uncommitted_changes",
            HealerSpellId::RewindToLastGreenCommit => "rewind_to_last_green_commit",
            HealerSpellId::MarkTaskBlockedWithFollowup => "mark_task_blocked_with_followup",
            HealerSpellId::RetryWithMinimalSubagent => "retry_with_minimal_subagent",
            HealerSpellId::RetryWithClaudeCodeResume => "retry_with_claude_code_resume",
            HealerSpellId::FixTypecheckErrors => "fix_typecheck_errors",
            HealerSpellId::FixTestErrors => "fix_test_errors",
            HealerSpellId::UpdateProgressWithGuidance => "update_progress_with_guidance",
            HealerSpellId::RunTasksDoctorLikeChecks => "run_tasks_doctor_like_checks",
        }
    }

    /// Whether this spell needs an LLM invocation
    pub fn requires_llm(&self) -> bool {
        matches!(
            self,
            HealerSpellId::FixTypecheckErrors
                | HealerSpellId::FixTestErrors
                | HealerSpellId::RetryWithClaudeCodeResume
                | HealerSpellId::RetryWithMinimalSubagent
        )
    }

    /// Spells whose success with applied changes means the failure is fixed
    pub fn is_repair(&self) -> bool {
        self.requires_llm()
    }
}

impl std::fmt::Display for HealerSpellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HealerSpellId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HealerSpellId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("Unknown spell: {}", s))
    }
}

// ============================================================================
// Results and Requests
// ============================================================================

/// A task-store mutation a spell wants applied. The Healer never applies
/// these itself; they are returned to the caller that owns the task store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TaskStoreRequest {
    BlockTask {
        task_id: String,
        reason: String,
    },
    CreateFollowup {
        parent_task_id: Option<String>,
        title: String,
        description: String,
    },
    AttachProgressNote {
        task_id: Option<String>,
        note: String,
    },
}

impl TaskStoreRequest {
    /// Block and follow-up requests are containment; they are dropped when
    /// the failure turns out resolved.
    pub fn is_containment(&self) -> bool {
        matches!(
            self,
            TaskStoreRequest::BlockTask { .. } | TaskStoreRequest::CreateFollowup { .. }
        )
    }
}

/// Result from executing a spell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealerSpellResult {
    pub success: bool,
    /// Whether the spell made changes to the repo or tasks
    pub changes_applied: bool,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_modified: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<TaskStoreRequest>,
}

impl HealerSpellResult {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            changes_applied: false,
            summary: summary.into(),
            files_modified: None,
            error: None,
            requests: Vec::new(),
        }
    }

    pub fn failure(summary: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            changes_applied: false,
            summary: summary.into(),
            files_modified: None,
            error: Some(error.into()),
            requests: Vec::new(),
        }
    }

    pub fn unknown(spell_id: &str) -> Self {
        let message = format!("Unknown spell: {}", spell_id);
        Self::failure(message.clone(), message)
    }

    pub fn with_changes(mut self, changes_applied: bool) -> Self {
        self.changes_applied = changes_applied;
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files_modified = Some(files);
        self
    }

    pub fn with_request(mut self, request: TaskStoreRequest) -> Self {
        self.requests.push(request);
        self
    }
}

/// One executed spell with the id it was requested under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellExecution {
    pub spell_id: String,
    pub result: HealerSpellResult,
}

impl SpellExecution {
    /// Parsed id, `None` for unknown spells
    pub fn id(&self) -> Option<HealerSpellId> {
        self.spell_id.parse().ok()
    }
}

// ============================================================================
// Spell Trait and Registry
// ============================================================================

#[async_trait]
pub trait Spell: Send + Sync {
    fn id(&self) -> HealerSpellId;

    fn description(&self) -> &str;

    fn requires_llm(&self) -> bool {
        self.id().requires_llm()
    }

    async fn apply(&self, ctx: &HealerContext) -> HealerSpellResult;
}

/// Execution options for a spell sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Run every spell even after one fails
    pub continue_on_failure: bool,
}

/// Hook into a spell sequence, called around every spell
pub trait SpellObserver {
    fn spell_started(&mut self, _spell_id: &str) {}
    fn spell_completed(&mut self, _spell_id: &str, _result: &HealerSpellResult) {}
}

impl SpellObserver for () {}

/// Catalog of spell implementations keyed by id
pub struct SpellRegistry {
    spells: HashMap<HealerSpellId, Arc<dyn Spell>>,
}

impl SpellRegistry {
    /// An empty registry
    pub fn empty() -> Self {
        Self {
            spells: HashMap::new(),
        }
    }

    /// Registry with the deterministic built-in spells
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(RewindUncommittedChangesSpell);
        registry.register(MarkTaskBlockedSpell);
        registry.register(UpdateProgressSpell);
        registry.register(TasksDoctorSpell);
        registry
    }

    /// Add or replace the implementation for a spell id
    pub fn register(&mut self, spell: impl Spell + 'static) {
        self.register_arc(Arc::new(spell));
    }

    pub fn register_arc(&mut self, spell: Arc<dyn Spell>) {
        let id = spell.id();
        if self.spells.insert(id, spell).is_some() {
            debug!(spell = %id, "Replaced spell implementation");
        }
    }

    pub fn get(&self, id: HealerSpellId) -> Option<Arc<dyn Spell>> {
        self.spells.get(&id).cloned()
    }

    pub fn contains(&self, id: HealerSpellId) -> bool {
        self.spells.contains_key(&id)
    }

    /// Registered ids in catalog order
    pub fn ids(&self) -> Vec<HealerSpellId> {
        HealerSpellId::ALL
            .into_iter()
            .filter(|id| self.spells.contains_key(id))
            .collect()
    }

    /// Execute one spell by id. Unknown ids produce a failed result.
    pub async fn execute_spell(&self, spell_id: &str, ctx: &HealerContext) -> HealerSpellResult {
        let Some(spell) = spell_id
            .parse::<HealerSpellId>()
            .ok()
            .and_then(|id| self.get(id))
        else {
            warn!(spell = spell_id, "Unknown spell requested");
            return HealerSpellResult::unknown(spell_id);
        };

        info!(spell = spell_id, scenario = %ctx.scenario(), "Casting spell");
        let result = spell.apply(ctx).await;
        if result.success {
            info!(
                spell = spell_id,
                changes_applied = result.changes_applied,
                "Spell succeeded"
            );
        } else {
            warn!(
                spell = spell_id,
                error = result.error.as_deref().unwrap_or(""),
                "Spell failed"
            );
        }
        result
    }

    /// Execute spells strictly in order; stops after the first failure
    /// unless `continue_on_failure` is set.
    pub async fn execute_spells<S: AsRef<str>>(
        &self,
        spell_ids: &[S],
        ctx: &HealerContext,
        options: ExecuteOptions,
    ) -> Vec<SpellExecution> {
        self.execute_spells_observed(spell_ids, ctx, options, &mut ())
            .await
    }

    /// [`execute_spells`](Self::execute_spells), reporting each spell to
    /// `observer` before and after it runs
    pub async fn execute_spells_observed<S: AsRef<str>>(
        &self,
        spell_ids: &[S],
        ctx: &HealerContext,
        options: ExecuteOptions,
        observer: &mut (dyn SpellObserver + Send),
    ) -> Vec<SpellExecution> {
        let mut executions = Vec::with_capacity(spell_ids.len());
        for spell_id in spell_ids {
            let spell_id = spell_id.as_ref();
            observer.spell_started(spell_id);
            let result = self.execute_spell(spell_id, ctx).await;
            observer.spell_completed(spell_id, &result);
            let failed = !result.success;
            executions.push(SpellExecution {
                spell_id: spell_id.to_string(),
                result,
            });
            if failed && !options.continue_on_failure {
                debug!(spell = spell_id, "Stopping spell sequence after failure");
                break;
            }
        }
        executions
    }
}

impl Default for SpellRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Allow/Deny Filtering
// ============================================================================

pub fn is_spell_allowed(spell_id: &str, ctx: &HealerContext) -> bool {
    ctx.config.spells.permits(spell_id)
}

pub fn filter_allowed_spells<S: AsRef<str>>(spell_ids: &[S], ctx: &HealerContext) -> Vec<String> {
    spell_ids
        .iter()
        .map(AsRef::as_ref)
        .filter(|id| is_spell_allowed(id, ctx))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealerConfig, HealerSpellsConfig};
    use crate::scenario::HealerScenario;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingSpell;

    #[async_trait]
    impl Spell for FailingSpell {
        fn id(&self) -> HealerSpellId {
            HealerSpellId::RewindToLastGreenCommit
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn apply(&self, _ctx: &HealerContext) -> HealerSpellResult {
            HealerSpellResult::failure("nope", "forced failure")
        }
    }

    struct CountingSpell(Arc<AtomicU32>);

    #[async_trait]
    impl Spell for CountingSpell {
        fn id(&self) -> HealerSpellId {
            HealerSpellId::UpdateProgressWithGuidance
        }

        fn description(&self) -> &str {
            "counts calls"
        }

        async fn apply(&self, _ctx: &HealerContext) -> HealerSpellResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            HealerSpellResult::success("counted")
        }
    }

    fn ctx_with_spells(spells: HealerSpellsConfig) -> HealerContext {
        HealerContext::builder("/tmp/project", HealerScenario::SubtaskFailed)
            .config(HealerConfig {
                spells,
                ..Default::default()
            })
            .build()
    }

    #[test]
    fn test_spell_id_parsing_and_display() {
        for id in HealerSpellId::ALL {
            assert_eq!(id.to_string().parse::<HealerSpellId>(), Ok(id));
        }
        assert_eq!(
            "unknown_spell".parse::<HealerSpellId>(),
            Err("Unknown spell: unknown_spell".to_string())
        );
        let json = serde_json::to_string(&HealerSpellId::MarkTaskBlockedWithFollowup).unwrap();
        assert_eq!(json, "\"mark_task_blocked_with_followup\"");
    }

    #[test]
    fn test_requires_llm() {
        assert!(HealerSpellId::FixTypecheckErrors.requires_llm());
        assert!(HealerSpellId::RetryWithMinimalSubagent.requires_llm());
        assert!(!HealerSpellId::RewindUncommittedChanges.requires_llm());
        assert!(!HealerSpellId::MarkTaskBlockedWithFollowup.requires_llm());
        assert!(!HealerSpellId::UpdateProgressWithGuidance.requires_llm());
    }

    #[test]
    fn test_builtin_registry() {
        let registry = SpellRegistry::new();
        assert_eq!(
            registry.ids(),
            vec![
                HealerSpellId::RewindUncommittedChanges,
                HealerSpellId::MarkTaskBlockedWithFollowup,
                HealerSpellId::UpdateProgressWithGuidance,
                HealerSpellId::RunTasksDoctorLikeChecks,
            ]
        );
        assert!(SpellRegistry::empty().ids().is_empty());
    }

    #[test]
    fn test_filter_with_forbidden() {
        let ctx = ctx_with_spells(HealerSpellsConfig {
            allowed: None,
            forbidden: Some(vec!["rewind_uncommitted_changes".to_string()]),
        });
        let filtered = filter_allowed_spells(
            &["rewind_uncommitted_changes", "mark_task_blocked_with_followup"],
            &ctx,
        );
        assert_eq!(filtered, vec!["mark_task_blocked_with_followup".to_string()]);
    }

    #[test]
    fn test_allowed_is_exclusive() {
        let ctx = ctx_with_spells(HealerSpellsConfig {
            allowed: Some(vec!["rewind_uncommitted_changes".to_string()]),
            forbidden: Some(vec!["rewind_uncommitted_changes".to_string()]),
        });
        assert!(is_spell_allowed("rewind_uncommitted_changes", &ctx));
        assert!(!is_spell_allowed("mark_task_blocked_with_followup", &ctx));
    }

    #[tokio::test]
    async fn test_unknown_spell_is_failed_result() {
        let registry = SpellRegistry::new();
        let ctx = ctx_with_spells(HealerSpellsConfig::default());
        let result = registry.execute_spell("unknown_spell", &ctx).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unknown spell: unknown_spell"));

        // Valid id with no implementation registered
        let result = registry.execute_spell("fix_test_errors", &ctx).await;
        assert_eq!(result.error.as_deref(), Some("Unknown spell: fix_test_errors"));
    }

    #[tokio::test]
    async fn test_execute_spells_fails_fast() {
        let registry = SpellRegistry::new();
        let ctx = ctx_with_spells(HealerSpellsConfig::default());
        let executions = registry
            .execute_spells(
                &["unknown_spell", "mark_task_blocked_with_followup"],
                &ctx,
                ExecuteOptions::default(),
            )
            .await;
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].spell_id, "unknown_spell");
        assert_eq!(executions[0].id(), None);
    }

    #[tokio::test]
    async fn test_execute_spells_continue_on_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = SpellRegistry::empty();
        registry.register(FailingSpell);
        registry.register(CountingSpell(calls.clone()));
        let ctx = ctx_with_spells(HealerSpellsConfig::default());

        let ids = ["rewind_to_last_green_commit", "update_progress_with_guidance"];
        let executions = registry
            .execute_spells(
                &ids,
                &ctx,
                ExecuteOptions {
                    continue_on_failure: true,
                },
            )
            .await;
        assert_eq!(executions.len(), 2);
        assert!(!executions[0].result.success);
        assert!(executions[1].result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let fail_fast = registry
            .execute_spells(&ids, &ctx, ExecuteOptions::default())
            .await;
        assert_eq!(fail_fast.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl SpellObserver for Recorder {
        fn spell_started(&mut self, spell_id: &str) {
            self.0.push(format!("start {}", spell_id));
        }

        fn spell_completed(&mut self, spell_id: &str, result: &HealerSpellResult) {
            self.0.push(format!("done {} {}", spell_id, result.success));
        }
    }

    #[tokio::test]
    async fn test_observer_sees_each_executed_spell() {
        let mut registry = SpellRegistry::empty();
        registry.register(FailingSpell);
        let ctx = ctx_with_spells(HealerSpellsConfig::default());

        let mut recorder = Recorder::default();
        let executions = registry
            .execute_spells_observed(
                &["rewind_to_last_green_commit", "update_progress_with_guidance"],
                &ctx,
                ExecuteOptions::default(),
                &mut recorder,
            )
            .await;
        assert_eq!(executions.len(), 1);
        assert_eq!(
            recorder.0,
            vec![
                "start rewind_to_last_green_commit".to_string(),
                "done rewind_to_last_green_commit false".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_register_replaces_builtin() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = SpellRegistry::new();
        registry.register(CountingSpell(calls.clone()));
        let ctx = ctx_with_spells(HealerSpellsConfig::default());

        let result = registry
            .execute_spell("update_progress_with_guidance", &ctx)
            .await;
        assert_eq!(result.summary, "counted");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
