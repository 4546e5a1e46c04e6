use super::{HealerSpellId, HealerSpellResult, Spell};
use crate::config::OPENAGENTS_DIR;
use crate::context::HealerContext;
use crate::types::TaskStatus;
use async_trait::async_trait;
use std::collections::HashSet;

/// Task file (relative to [`OPENAGENTS_DIR`])
pub const TASKS_FILE: &str = "tasks.jsonl";

const MAX_REPORTED_ISSUES: usize = 5;

/// Read-only structural validation of `.openagents/tasks.jsonl`
pub struct TasksDoctorSpell;

#[async_trait]
impl Spell for TasksDoctorSpell {
    fn id(&self) -> HealerSpellId {
        HealerSpellId::RunTasksDoctorLikeChecks
    }

    fn description(&self) -> &str {
        "Validate tasks.jsonl structure"
    }

    async fn apply(&self, ctx: &HealerContext) -> HealerSpellResult {
        let path = ctx.project_root.join(OPENAGENTS_DIR).join(TASKS_FILE);
        if !path.exists() {
            return HealerSpellResult::success(format!(
                "No task file at {}, nothing to check",
                path.display()
            ));
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                return HealerSpellResult::failure(
                    "Could not read task file",
                    format!("{}: {}", path.display(), e),
                );
            }
        };

        let issues = check_tasks_jsonl(&content);
        if issues.is_empty() {
            return HealerSpellResult::success(format!("{} is well-formed", path.display()));
        }

        let mut listed: Vec<String> = issues.iter().take(MAX_REPORTED_ISSUES).cloned().collect();
        if issues.len() > MAX_REPORTED_ISSUES {
            listed.push(format!("... and {} more", issues.len() - MAX_REPORTED_ISSUES));
        }
        HealerSpellResult::failure(
            format!("Found {} issue(s) in {}", issues.len(), path.display()),
            listed.join("\n"),
        )
    }
}

/// Problems found in a tasks.jsonl document, one message per issue
pub fn check_tasks_jsonl(content: &str) -> Vec<String> {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }

        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                issues.push(format!("line {}: invalid JSON ({})", line_no, e));
                continue;
            }
        };
        let Some(obj) = value.as_object() else {
            issues.push(format!("line {}: expected a JSON object", line_no));
            continue;
        };

        match obj.get("id").and_then(|v| v.as_str()) {
            Some(id) if !id.trim().is_empty() => {
                if !seen.insert(id.to_string()) {
                    issues.push(format!("line {}: duplicate id '{}'", line_no, id));
                }
            }
            _ => issues.push(format!("line {}: missing or empty 'id'", line_no)),
        }

        match obj.get("title").and_then(|v| v.as_str()) {
            Some(title) if !title.trim().is_empty() => {}
            _ => issues.push(format!("line {}: missing or empty 'title'", line_no)),
        }

        match obj.get("status").and_then(|v| v.as_str()) {
            Some(status) if status.parse::<TaskStatus>().is_ok() => {}
            Some(status) => issues.push(format!("line {}: unknown status '{}'", line_no, status)),
            None => issues.push(format!("line {}: missing 'status'", line_no)),
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::HealerScenario;
    use tempfile::tempdir;

    #[test]
    fn test_valid_document() {
        let content = concat!(
            r#"{"id":"oa-1","title":"One","status":"open"}"#,
            "\n\n",
            r#"{"id":"oa-2","title":"Two","status":"in_progress"}"#,
            "\n"
        );
        assert!(check_tasks_jsonl(content).is_empty());
    }

    #[test]
    fn test_reports_each_problem() {
        let content = concat!(
            r#"{"id":"oa-1","title":"One","status":"open"}"#,
            "\n",
            r#"{"id":"oa-1","title":"","status":"paused"}"#,
            "\n",
            "not json\n",
            "[1,2]\n",
            r#"{"title":"No id"}"#,
        );
        let issues = check_tasks_jsonl(content);
        assert!(issues.iter().any(|i| i.contains("line 2: duplicate id 'oa-1'")));
        assert!(issues.iter().any(|i| i.contains("line 2: missing or empty 'title'")));
        assert!(issues.iter().any(|i| i.contains("line 2: unknown status 'paused'")));
        assert!(issues.iter().any(|i| i.contains("line 3: invalid JSON")));
        assert!(issues.iter().any(|i| i.contains("line 4: expected a JSON object")));
        assert!(issues.iter().any(|i| i.contains("line 5: missing or empty 'id'")));
        assert!(issues.iter().any(|i| i.contains("line 5: missing 'status'")));
    }

    #[tokio::test]
    async fn test_missing_file_is_noop() {
        let dir = tempdir().unwrap();
        let ctx = HealerContext::builder(dir.path(), HealerScenario::RuntimeError).build();
        let result = TasksDoctorSpell.apply(&ctx).await;
        assert!(result.success);
        assert!(!result.changes_applied);
    }

    #[tokio::test]
    async fn test_broken_file_fails() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(OPENAGENTS_DIR)).unwrap();
        std::fs::write(dir.path().join(OPENAGENTS_DIR).join(TASKS_FILE), "{oops\n").unwrap();
        let ctx = HealerContext::builder(dir.path(), HealerScenario::RuntimeError).build();
        let result = TasksDoctorSpell.apply(&ctx).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("line 1"));
    }
}
