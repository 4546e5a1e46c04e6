use crate::patterns::detect_error_patterns;
use crate::scenario::HealerScenario;
use serde::{Deserialize, Serialize};

/// Heuristics computed from available data to inform spell selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealerHeuristics {
    pub scenario: HealerScenario,
    /// Number of times this subtask has failed
    pub failure_count: u32,
    /// Different error signatures were recorded for the same failure site
    pub is_flaky: bool,
    pub has_missing_imports: bool,
    pub has_type_errors: bool,
    pub has_test_assertions: bool,
    /// Labels from [`detect_error_patterns`]
    pub error_patterns: Vec<String>,
    /// Dedup records already stored for this task/subtask/scenario
    pub previous_attempts: u32,
}

impl HealerHeuristics {
    pub fn new(scenario: HealerScenario) -> Self {
        Self {
            scenario,
            failure_count: 0,
            is_flaky: false,
            has_missing_imports: false,
            has_type_errors: false,
            has_test_assertions: false,
            error_patterns: Vec::new(),
            previous_attempts: 0,
        }
    }
}

/// Build heuristics from error output and dedup history.
///
/// `distinct_signatures` is the number of different error hashes seen for
/// the same task/subtask/scenario, the current failure included.
pub fn build_heuristics(
    scenario: HealerScenario,
    error_output: Option<&str>,
    failure_count: u32,
    previous_attempts: u32,
    distinct_signatures: usize,
) -> HealerHeuristics {
    let patterns = error_output.map(detect_error_patterns).unwrap_or_default();

    HealerHeuristics {
        scenario,
        failure_count,
        is_flaky: distinct_signatures >= 2,
        has_missing_imports: patterns
            .iter()
            .any(|p| p.contains("Import") || p.contains("module")),
        has_type_errors: patterns
            .iter()
            .any(|p| p.contains("Type") || p.contains("compiler")),
        has_test_assertions: patterns
            .iter()
            .any(|p| p.contains("Assertion") || p.contains("Test")),
        error_patterns: patterns,
        previous_attempts,
    }
}
