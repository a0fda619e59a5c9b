// src/baseline/builder.rs
// Aggregates run results into the canonical, content-hashed baseline document

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

use super::{
    Baseline, BaselineCapabilities, BaselineMetadata, BaselineServer, FORMAT_VERSION, RunSummary,
    ToolSummary, WorkflowSignature,
};
use crate::discovery::DiscoveredServer;
use crate::error::{BellwetherError, Result};
use crate::executor::RunOutcome;

/// Assembles a [`Baseline`] from the pieces a run produces.
pub struct BaselineBuilder {
    server: BaselineServer,
    capabilities: BaselineCapabilities,
    server_command: String,
    mode: String,
}

impl BaselineBuilder {
    pub fn from_discovery(discovered: &DiscoveredServer, server_command: String) -> Self {
        let mut tools: Vec<ToolSummary> = discovered
            .tools
            .iter()
            .map(|tool| ToolSummary {
                name: tool.name.clone(),
                description: tool.description_or_empty().to_string(),
                input_schema: tool.input_schema.clone(),
                annotations: tool.annotations.clone(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            server: BaselineServer {
                name: discovered.server.name.clone(),
                version: discovered.server.version.clone(),
                protocol_version: discovered.protocol_version.clone(),
                capabilities: discovered.capabilities.names(),
            },
            capabilities: BaselineCapabilities { tools },
            server_command,
            mode: "check".to_string(),
        }
    }

    /// Build the final document. Sorts every keyed list, stamps the format
    /// version, and computes the content hash last.
    pub fn build(
        self,
        outcome: &RunOutcome,
        mut workflow_signatures: Vec<WorkflowSignature>,
        duration_ms: u64,
    ) -> Baseline {
        let mut tool_profiles: Vec<_> = outcome
            .tool_results
            .iter()
            .map(|r| r.fingerprint.clone())
            .collect();
        tool_profiles.sort_by(|a, b| a.name.cmp(&b.name));
        workflow_signatures.sort_by(|a, b| a.name.cmp(&b.name));

        let scenarios_run: usize = outcome.tool_results.iter().map(|r| r.records.len()).sum();
        let scenarios_passed: usize = outcome
            .tool_results
            .iter()
            .flat_map(|r| r.records.iter())
            .filter(|r| r.passed)
            .count();
        let summary = RunSummary {
            tools_discovered: self.capabilities.tools.len(),
            tools_tested: outcome.tool_results.iter().filter(|r| !r.skipped).count(),
            tools_skipped: outcome.tool_results.iter().filter(|r| r.skipped).count(),
            scenarios_run,
            scenarios_passed,
            scenarios_failed: scenarios_run - scenarios_passed,
        };

        let mut baseline = Baseline {
            version: FORMAT_VERSION.to_string(),
            metadata: BaselineMetadata {
                mode: self.mode,
                generated_at: crate::utils::now_rfc3339(),
                server_command: self.server_command,
                duration_ms,
                cancelled: outcome.cancelled,
            },
            server: self.server,
            capabilities: self.capabilities,
            tool_profiles,
            workflow_signatures,
            summary,
            hash: String::new(),
        };
        baseline.hash = compute_hash(&baseline);
        info!(
            tools = baseline.tool_profiles.len(),
            hash = %baseline.hash,
            cancelled = baseline.metadata.cancelled,
            "baseline built"
        );
        baseline
    }
}

/// Content hash of the canonicalized document: the serialized value with the
/// `hash` field and transient fields (timestamps, durations) elided, keys
/// sorted by serde_json's map ordering.
pub fn compute_hash(baseline: &Baseline) -> String {
    let mut value = match serde_json::to_value(baseline) {
        Ok(value) => value,
        Err(_) => return String::new(),
    };
    elide_transient(&mut value);
    let canonical = value.to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn elide_transient(value: &mut Value) {
    if let Some(object) = value.as_object_mut() {
        object.remove("hash");
        // Run statistics describe the run, not the server: a skip-everything
        // incremental run must hash identically to the full run it mirrors.
        object.remove("summary");
        if let Some(metadata) = object.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            metadata.remove("generatedAt");
            metadata.remove("durationMs");
        }
        if let Some(profiles) = object.get_mut("toolProfiles").and_then(|p| p.as_array_mut()) {
            for profile in profiles {
                if let Some(profile) = profile.as_object_mut() {
                    profile.remove("lastTestedAt");
                }
            }
        }
    }
}

/// Serialize with stable pretty-printing. Struct field order is fixed with
/// `hash` last; nested maps are key-sorted by construction.
pub fn save_baseline(baseline: &Baseline, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut json = serde_json::to_string_pretty(baseline)?;
    json.push('\n');
    std::fs::write(path, json)?;
    debug!(path = %path.display(), "baseline written");
    Ok(())
}

/// Load a baseline and verify its integrity hash.
pub fn load_baseline(path: &Path) -> Result<Baseline> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| BellwetherError::FormatInvalid(format!("{}: {}", path.display(), e)))?;
    let baseline: Baseline = serde_json::from_str(&content)
        .map_err(|e| BellwetherError::FormatInvalid(e.to_string()))?;

    let expected = compute_hash(&baseline);
    if baseline.hash != expected {
        return Err(BellwetherError::IntegrityFailed {
            expected: baseline.hash.clone(),
            actual: expected,
        });
    }
    Ok(baseline)
}

/// Load without the integrity check, for `baseline show` on hand-edited files.
pub fn load_baseline_unchecked(path: &Path) -> Result<Baseline> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| BellwetherError::FormatInvalid(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&content).map_err(|e| BellwetherError::FormatInvalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::ToolFingerprint;

    fn sample_baseline() -> Baseline {
        let mut baseline = Baseline {
            version: FORMAT_VERSION.into(),
            metadata: BaselineMetadata {
                mode: "check".into(),
                generated_at: "2024-01-01T00:00:00Z".into(),
                server_command: "npx server".into(),
                duration_ms: 1234,
                cancelled: false,
            },
            server: BaselineServer {
                name: "sample".into(),
                version: "1.0.0".into(),
                protocol_version: "2025-06-18".into(),
                capabilities: vec!["tools".into()],
            },
            capabilities: BaselineCapabilities {
                tools: vec![ToolSummary {
                    name: "ping".into(),
                    description: "Replies".into(),
                    input_schema: Some(serde_json::json!({"type": "object"})),
                    annotations: None,
                }],
            },
            tool_profiles: vec![ToolFingerprint {
                name: "ping".into(),
                description: "Replies".into(),
                schema_hash: "abcd1234abcd1234".into(),
                assertions: vec!["happy_path: all scenarios pass".into()],
                security_notes: vec![],
                limitations: vec![],
                last_tested_at: "2024-01-01T00:00:00Z".into(),
                input_schema_hash_at_test: "abcd1234abcd1234".into(),
                error_patterns: vec![],
            }],
            workflow_signatures: vec![],
            summary: RunSummary {
                tools_discovered: 1,
                tools_tested: 1,
                tools_skipped: 0,
                scenarios_run: 3,
                scenarios_passed: 3,
                scenarios_failed: 0,
            },
            hash: String::new(),
        };
        baseline.hash = compute_hash(&baseline);
        baseline
    }

    #[test]
    fn test_round_trip_preserves_document_and_hash() {
        let baseline = sample_baseline();
        let json = serde_json::to_string_pretty(&baseline).unwrap();
        let parsed: Baseline = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, baseline);
        assert_eq!(compute_hash(&parsed), baseline.hash);
    }

    #[test]
    fn test_hash_ignores_transient_fields() {
        let baseline = sample_baseline();
        let mut later = baseline.clone();
        later.metadata.generated_at = "2024-06-01T12:00:00Z".into();
        later.metadata.duration_ms = 9999;
        later.tool_profiles[0].last_tested_at = "2024-06-01T12:00:00Z".into();
        assert_eq!(compute_hash(&baseline), compute_hash(&later));
    }

    #[test]
    fn test_hash_sensitive_to_content() {
        let baseline = sample_baseline();
        let mut changed = baseline.clone();
        changed.tool_profiles[0].schema_hash = "ffff0000ffff0000".into();
        assert_ne!(compute_hash(&baseline), compute_hash(&changed));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseline.json");
        let baseline = sample_baseline();
        save_baseline(&baseline, &path).unwrap();
        let loaded = load_baseline(&path).unwrap();
        assert_eq!(loaded, baseline);
    }

    #[test]
    fn test_tampered_file_fails_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseline.json");
        let baseline = sample_baseline();
        save_baseline(&baseline, &path).unwrap();

        let tampered = std::fs::read_to_string(&path)
            .unwrap()
            .replace("abcd1234abcd1234", "eeee0000eeee0000");
        std::fs::write(&path, tampered).unwrap();

        assert!(matches!(
            load_baseline(&path),
            Err(BellwetherError::IntegrityFailed { .. })
        ));
    }

    #[test]
    fn test_hash_is_last_top_level_field() {
        let baseline = sample_baseline();
        let json = serde_json::to_string_pretty(&baseline).unwrap();
        let hash_position = json.rfind("\"hash\"").unwrap();
        for field in ["\"version\"", "\"metadata\"", "\"toolProfiles\"", "\"summary\""] {
            assert!(json.find(field).unwrap() < hash_position);
        }
    }
}
