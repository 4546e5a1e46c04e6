//! Persisted deduplication of healing attempts
//!
//! Maps a failure fingerprint to the last recorded attempt. The file lives
//! under `.openagents/healer/attempts.json`, is loaded lazily on first
//! access and written through on every [`DedupStore::record`].
//!
//! There is no file locking: one active Healer per project root is assumed.
//! A second writer would overwrite records with its own in-memory view.

use crate::config::OPENAGENTS_DIR;
use crate::error::{HealerError, HealerResult};
use crate::outcome::{HealerOutcome, HealerOutcomeStatus};
use crate::patterns::normalize_error_text;
use crate::scenario::HealerScenario;
use crate::spells::HealerSpellId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory (relative to [`OPENAGENTS_DIR`]) for Healer state
pub const HEALER_DIR: &str = "healer";

/// Dedup file name inside [`HEALER_DIR`]
pub const ATTEMPTS_FILE: &str = "attempts.json";

const ATTEMPTS_FILE_VERSION: u32 = 1;

// ============================================================================
// Fingerprint
// ============================================================================

/// Stable identity of a failure: task, subtask, scenario and normalized
/// error text. Timestamps and session ids never contribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub key: String,
    pub error_hash: String,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<String>,
    pub scenario: HealerScenario,
}

impl Fingerprint {
    pub fn compute(
        scenario: HealerScenario,
        task_id: Option<&str>,
        subtask_id: Option<&str>,
        error_output: &str,
    ) -> Self {
        let task_id = task_id.unwrap_or("none").to_string();
        let error_hash = hash_error(&format!(
            "{}:{}",
            scenario,
            normalize_error_text(error_output)
        ));
        let key = format!(
            "{}:{}:{}:{}",
            task_id,
            subtask_id.unwrap_or("none"),
            scenario,
            error_hash
        );
        Self {
            key,
            error_hash,
            task_id,
            subtask_id: subtask_id.map(str::to_string),
            scenario,
        }
    }

    /// Whether an attempt belongs to the same task/subtask/scenario, whatever
    /// its error text
    pub fn same_site(&self, attempt: &HealingAttempt) -> bool {
        attempt.task_id == self.task_id
            && attempt.subtask_id == self.subtask_id
            && attempt.scenario == self.scenario
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

/// First 8 bytes of the SHA-256 digest, hex encoded
pub fn hash_error(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

// ============================================================================
// Healing Attempt
// ============================================================================

/// A persisted record of a healing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingAttempt {
    pub key: String,
    pub scenario: HealerScenario,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<String>,
    pub error_hash: String,
    /// RFC 3339
    pub timestamp: String,
    pub outcome: HealerOutcomeStatus,
    #[serde(default)]
    pub spells_tried: Vec<HealerSpellId>,
    #[serde(default)]
    pub spells_succeeded: Vec<HealerSpellId>,
    #[serde(default)]
    pub summary: String,
}

impl HealingAttempt {
    pub fn new(fingerprint: &Fingerprint, outcome: &HealerOutcome) -> Self {
        Self::at(fingerprint, outcome, Utc::now())
    }

    pub fn at(fingerprint: &Fingerprint, outcome: &HealerOutcome, when: DateTime<Utc>) -> Self {
        Self {
            key: fingerprint.key.clone(),
            scenario: fingerprint.scenario,
            task_id: fingerprint.task_id.clone(),
            subtask_id: fingerprint.subtask_id.clone(),
            error_hash: fingerprint.error_hash.clone(),
            timestamp: when.to_rfc3339(),
            outcome: outcome.status,
            spells_tried: outcome.spells_tried.clone(),
            spells_succeeded: outcome.spells_succeeded.clone(),
            summary: outcome.summary.clone(),
        }
    }

    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct AttemptsFile {
    version: u32,
    #[serde(default)]
    attempts: BTreeMap<String, HealingAttempt>,
}

/// File-backed fingerprint -> last attempt map
#[derive(Debug)]
pub struct DedupStore {
    path: PathBuf,
    ttl_hours: Option<f64>,
    records: Option<BTreeMap<String, HealingAttempt>>,
}

impl DedupStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ttl_hours: None,
            records: None,
        }
    }

    /// Store at the standard location under a project root
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        Self::new(
            project_root
                .as_ref()
                .join(OPENAGENTS_DIR)
                .join(HEALER_DIR)
                .join(ATTEMPTS_FILE),
        )
    }

    /// Resolved records older than `ttl_hours` stop short-circuiting
    pub fn with_ttl_hours(mut self, ttl_hours: Option<f64>) -> Self {
        self.ttl_hours = ttl_hours;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn records(&mut self) -> HealerResult<&mut BTreeMap<String, HealingAttempt>> {
        if self.records.is_none() {
            let loaded = read_attempts(&self.path)?;
            debug!(path = %self.path.display(), records = loaded.len(), "Loaded dedup store");
            self.records = Some(loaded);
        }
        Ok(self.records.get_or_insert_with(BTreeMap::new))
    }

    /// Last attempt recorded for a fingerprint
    pub fn check(&mut self, fingerprint: &Fingerprint) -> HealerResult<Option<HealingAttempt>> {
        Ok(self.records()?.get(&fingerprint.key).cloned())
    }

    /// Whether an attempt should short-circuit a new invocation
    pub fn is_spent(&self, attempt: &HealingAttempt) -> bool {
        self.is_spent_at(attempt, Utc::now())
    }

    pub fn is_spent_at(&self, attempt: &HealingAttempt, now: DateTime<Utc>) -> bool {
        if attempt.outcome != HealerOutcomeStatus::Resolved {
            return false;
        }
        match (self.ttl_hours, attempt.recorded_at()) {
            (Some(ttl), Some(at)) => {
                let age_hours = (now - at).num_seconds() as f64 / 3600.0;
                age_hours < ttl
            }
            _ => true,
        }
    }

    /// Insert or overwrite the record for a fingerprint and persist
    pub fn record(&mut self, attempt: HealingAttempt) -> HealerResult<()> {
        self.records()?.insert(attempt.key.clone(), attempt);
        self.persist()
    }

    /// Records for the same task/subtask/scenario, any error text
    pub fn related(&mut self, fingerprint: &Fingerprint) -> HealerResult<Vec<HealingAttempt>> {
        Ok(self
            .records()?
            .values()
            .filter(|a| fingerprint.same_site(a))
            .cloned()
            .collect())
    }

    /// Number of distinct error signatures at a fingerprint's site,
    /// counting the fingerprint's own
    pub fn distinct_signatures(&mut self, fingerprint: &Fingerprint) -> HealerResult<usize> {
        let mut hashes: HashSet<String> = self
            .related(fingerprint)?
            .into_iter()
            .map(|a| a.error_hash)
            .collect();
        hashes.insert(fingerprint.error_hash.clone());
        Ok(hashes.len())
    }

    pub fn attempts(&mut self) -> HealerResult<Vec<HealingAttempt>> {
        Ok(self.records()?.values().cloned().collect())
    }

    /// Forget one fingerprint. Returns whether a record existed.
    pub fn reset(&mut self, key: &str) -> HealerResult<bool> {
        let removed = self.records()?.remove(key).is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Forget every record of a task. Returns how many were removed.
    pub fn reset_task(&mut self, task_id: &str) -> HealerResult<usize> {
        let records = self.records()?;
        let before = records.len();
        records.retain(|_, a| a.task_id != task_id);
        let removed = before - records.len();
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Forget everything. Returns how many records were removed.
    pub fn clear(&mut self) -> HealerResult<usize> {
        let records = self.records()?;
        let removed = records.len();
        records.clear();
        self.persist()?;
        Ok(removed)
    }

    fn persist(&self) -> HealerResult<()> {
        let file = AttemptsFile {
            version: ATTEMPTS_FILE_VERSION,
            attempts: self.records.clone().unwrap_or_default(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HealerError::storage(parent, e.to_string()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| HealerError::storage(&tmp, e.to_string()))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| HealerError::storage(&self.path, e.to_string()))?;
        Ok(())
    }
}

fn read_attempts(path: &Path) -> HealerResult<BTreeMap<String, HealingAttempt>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content =
        std::fs::read_to_string(path).map_err(|e| HealerError::storage(path, e.to_string()))?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let file: AttemptsFile = serde_json::from_str(&content)
        .map_err(|e| HealerError::storage(path, format!("corrupt dedup file: {}", e)))?;
    Ok(file.attempts)
}
