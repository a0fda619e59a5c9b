// src/golden.rs
// Golden tool-output snapshots: save, compare, list, delete

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{BellwetherError, Result};
use crate::executor::ScenarioRecord;
use crate::scenario::Category;
use crate::utils::json::flatten;

/// Categories whose outputs are stable enough to pin as goldens.
const GOLDEN_CATEGORIES: [Category; 2] = [Category::HappyPath, Category::Enum];

/// One tool's pinned outputs, keyed by scenario id.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GoldenFile {
    pub tool: String,
    pub saved_at: String,
    /// Scenario id → unwrapped payload.
    pub outputs: BTreeMap<String, Value>,
}

/// One detected divergence from a golden.
#[derive(Debug, Clone, Serialize)]
pub struct GoldenMismatch {
    pub tool: String,
    pub scenario_id: String,
    /// Flattened path that differs, with the stored and observed values.
    pub path: String,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

/// Directory-backed golden store. One JSON file per tool.
pub struct GoldenStore {
    dir: PathBuf,
}

impl GoldenStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn path_for(&self, tool: &str) -> PathBuf {
        // Tool names may contain path-hostile characters.
        let safe: String = tool
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    /// Pin the passing happy-path and enum outputs from a run.
    pub fn save(&self, records: &[ScenarioRecord]) -> Result<usize> {
        std::fs::create_dir_all(&self.dir)?;

        let mut by_tool: BTreeMap<String, GoldenFile> = BTreeMap::new();
        for record in records {
            if !GOLDEN_CATEGORIES.contains(&record.category) || !record.passed || record.warmup {
                continue;
            }
            let entry = by_tool
                .entry(record.tool_name.clone())
                .or_insert_with(|| GoldenFile {
                    tool: record.tool_name.clone(),
                    saved_at: crate::utils::now_rfc3339(),
                    outputs: BTreeMap::new(),
                });
            entry
                .outputs
                .insert(record.scenario_id.clone(), record.payload.clone());
        }

        let count = by_tool.len();
        for (tool, file) in by_tool {
            let path = self.path_for(&tool);
            let mut json = serde_json::to_string_pretty(&file)?;
            json.push('\n');
            std::fs::write(&path, json)?;
            debug!(tool = %tool, path = %path.display(), "golden saved");
        }
        info!(tools = count, "golden snapshots saved");
        Ok(count)
    }

    /// Compare a run's records against the pinned outputs. Scenarios with no
    /// golden are ignored; missing scenarios are reported as mismatches.
    pub fn compare(&self, records: &[ScenarioRecord]) -> Result<Vec<GoldenMismatch>> {
        let mut mismatches = Vec::new();

        for tool in self.list()? {
            let golden = self.load(&tool)?;
            for (scenario_id, expected) in &golden.outputs {
                let Some(record) = records.iter().find(|r| &r.scenario_id == scenario_id) else {
                    mismatches.push(GoldenMismatch {
                        tool: tool.clone(),
                        scenario_id: scenario_id.clone(),
                        path: String::new(),
                        expected: Some(expected.clone()),
                        actual: None,
                    });
                    continue;
                };
                mismatches.extend(diff_payloads(
                    &tool,
                    scenario_id,
                    expected,
                    &record.payload,
                ));
            }
        }
        Ok(mismatches)
    }

    pub fn load(&self, tool: &str) -> Result<GoldenFile> {
        let path = self.path_for(tool);
        let content = std::fs::read_to_string(&path)
            .map_err(|_| BellwetherError::FormatInvalid(format!("no golden for '{}'", tool)))?;
        serde_json::from_str(&content).map_err(|e| BellwetherError::FormatInvalid(e.to_string()))
    }

    /// Tools with stored goldens, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut tools = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(tools),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Ok(content) = std::fs::read_to_string(&path)
                && let Ok(file) = serde_json::from_str::<GoldenFile>(&content)
            {
                tools.push(file.tool);
            }
        }
        tools.sort();
        Ok(tools)
    }

    pub fn delete(&self, tool: &str) -> Result<bool> {
        let path = self.path_for(tool);
        if path.exists() {
            std::fs::remove_file(&path)?;
            info!(tool = %tool, "golden deleted");
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Leaf-level comparison of a stored payload against an observed one.
fn diff_payloads(
    tool: &str,
    scenario_id: &str,
    expected: &Value,
    actual: &Value,
) -> Vec<GoldenMismatch> {
    let expected_leaves: BTreeMap<String, Value> = flatten(expected).into_iter().collect();
    let actual_leaves: BTreeMap<String, Value> = flatten(actual).into_iter().collect();

    let mut mismatches = Vec::new();
    for (path, expected_value) in &expected_leaves {
        match actual_leaves.get(path) {
            Some(actual_value) if actual_value == expected_value => {}
            other => mismatches.push(GoldenMismatch {
                tool: tool.to_string(),
                scenario_id: scenario_id.to_string(),
                path: path.clone(),
                expected: Some(expected_value.clone()),
                actual: other.cloned(),
            }),
        }
    }
    for (path, actual_value) in &actual_leaves {
        if !expected_leaves.contains_key(path) {
            mismatches.push(GoldenMismatch {
                tool: tool.to_string(),
                scenario_id: scenario_id.to_string(),
                path: path.clone(),
                expected: None,
                actual: Some(actual_value.clone()),
            });
        }
    }
    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, tool: &str, category: Category, payload: Value) -> ScenarioRecord {
        ScenarioRecord {
            scenario_id: id.into(),
            tool_name: tool.into(),
            category,
            args: json!({}),
            raw_response: None,
            payload,
            passed: true,
            assertion_outcomes: Vec::new(),
            error: None,
            error_kind: None,
            security_note: None,
            limitation: None,
            duration_ms: 1,
            warmup: false,
        }
    }

    #[test]
    fn test_save_compare_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = GoldenStore::new(dir.path());

        let records = vec![record(
            "echo::happy_path::0",
            "echo",
            Category::HappyPath,
            json!({"text": "hello"}),
        )];
        assert_eq!(store.save(&records).unwrap(), 1);
        assert!(store.compare(&records).unwrap().is_empty());
    }

    #[test]
    fn test_compare_reports_changed_leaf() {
        let dir = tempfile::tempdir().unwrap();
        let store = GoldenStore::new(dir.path());

        store
            .save(&[record(
                "echo::happy_path::0",
                "echo",
                Category::HappyPath,
                json!({"text": "hello", "count": 1}),
            )])
            .unwrap();

        let drifted = vec![record(
            "echo::happy_path::0",
            "echo",
            Category::HappyPath,
            json!({"text": "hello", "count": 2}),
        )];
        let mismatches = store.compare(&drifted).unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].path, "count");
        assert_eq!(mismatches[0].expected, Some(json!(1)));
        assert_eq!(mismatches[0].actual, Some(json!(2)));
    }

    #[test]
    fn test_security_outputs_not_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let store = GoldenStore::new(dir.path());
        let records = vec![record(
            "echo::security::0",
            "echo",
            Category::Security,
            json!({"x": 1}),
        )];
        assert_eq!(store.save(&records).unwrap(), 0);
    }

    #[test]
    fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = GoldenStore::new(dir.path());
        store
            .save(&[record(
                "echo::happy_path::0",
                "echo",
                Category::HappyPath,
                json!({}),
            )])
            .unwrap();

        assert_eq!(store.list().unwrap(), vec!["echo"]);
        assert!(store.delete("echo").unwrap());
        assert!(!store.delete("echo").unwrap());
        assert!(store.list().unwrap().is_empty());
    }
}
