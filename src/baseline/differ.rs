// src/baseline/differ.rs
// Semantic diff between two baselines with a severity verdict

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use super::{Baseline, ToolFingerprint, major_version};
use crate::config::DiffPolicy;
use crate::error::{BellwetherError, Result};
use crate::schema::{CompareOptions, compare_schemas};

/// Drift verdict, ordered: clean < info < warning < breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffSeverity {
    Clean,
    Info,
    Warning,
    Breaking,
}

impl DiffSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffSeverity::Clean => "clean",
            DiffSeverity::Info => "info",
            DiffSeverity::Warning => "warning",
            DiffSeverity::Breaking => "breaking",
        }
    }

    /// Exit code mapping for `--fail-on-drift`.
    pub fn exit_code(&self) -> i32 {
        match self {
            DiffSeverity::Clean | DiffSeverity::Info => 0,
            DiffSeverity::Warning => 2,
            DiffSeverity::Breaking => 3,
        }
    }
}

impl fmt::Display for DiffSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One changed aspect of one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AspectChange {
    pub aspect: String,
    pub description: String,
    pub significance: DiffSeverity,
}

/// All observed changes for one common tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolModification {
    pub tool: String,
    pub schema_changed: bool,
    pub changes: Vec<AspectChange>,
}

/// The complete diff document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineDiff {
    pub tools_added: Vec<String>,
    pub tools_removed: Vec<String>,
    pub tools_modified: Vec<ToolModification>,
    /// Workflows that succeeded in the old baseline and fail in the new one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workflows_regressed: Vec<String>,
    pub severity: DiffSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_compatibility: Option<String>,
}

impl BaselineDiff {
    pub fn is_clean(&self) -> bool {
        self.severity == DiffSeverity::Clean
    }
}

/// Compare two baselines (old → new) and classify the drift.
pub fn diff_baselines(old: &Baseline, new: &Baseline, policy: &DiffPolicy) -> Result<BaselineDiff> {
    // Version gate: diffing across major format versions is refused unless
    // overridden.
    let old_major = major_version(&old.version)
        .ok_or_else(|| BellwetherError::FormatInvalid(format!("bad version '{}'", old.version)))?;
    let new_major = major_version(&new.version)
        .ok_or_else(|| BellwetherError::FormatInvalid(format!("bad version '{}'", new.version)))?;
    let version_compatibility = if old_major != new_major {
        if !policy.allow_version_mismatch {
            return Err(BellwetherError::VersionMismatch {
                ours: new_major,
                theirs: old_major,
            });
        }
        Some(format!(
            "format major versions differ ({} vs {}); compared under override",
            old.version, new.version
        ))
    } else {
        None
    };

    // A cancelled run's baseline is partial and not comparable by default.
    if (old.metadata.cancelled || new.metadata.cancelled) && !policy.allow_cancelled {
        return Err(BellwetherError::CancelledBaseline);
    }

    let old_names: BTreeSet<&str> = old.tool_names().into_iter().collect();
    let new_names: BTreeSet<&str> = new.tool_names().into_iter().collect();

    let tools_added: Vec<String> = new_names
        .difference(&old_names)
        .map(|s| s.to_string())
        .collect();
    let tools_removed: Vec<String> = old_names
        .difference(&new_names)
        .map(|s| s.to_string())
        .collect();

    let compare_options = CompareOptions {
        optional_add_breaking: policy.optional_add_breaking,
        enum_add_breaking: policy.enum_add_breaking,
    };

    let mut tools_modified: Vec<ToolModification> = Vec::new();
    for name in old_names.intersection(&new_names) {
        let old_fp = old.fingerprint(name);
        let new_fp = new.fingerprint(name);
        let (Some(old_fp), Some(new_fp)) = (old_fp, new_fp) else {
            continue;
        };
        let modification = diff_tool(old, new, old_fp, new_fp, compare_options);
        if !modification.changes.is_empty() {
            tools_modified.push(modification);
        }
    }
    tools_modified.sort_by(|a, b| a.tool.cmp(&b.tool));

    let workflows_regressed: Vec<String> = old
        .workflow_signatures
        .iter()
        .filter(|old_sig| {
            old_sig.succeeded
                && new
                    .workflow_signatures
                    .iter()
                    .any(|new_sig| new_sig.name == old_sig.name && !new_sig.succeeded)
        })
        .map(|sig| sig.name.clone())
        .collect();

    let severity = rollup(&tools_added, &tools_removed, &tools_modified, &workflows_regressed);
    debug!(
        added = tools_added.len(),
        removed = tools_removed.len(),
        modified = tools_modified.len(),
        %severity,
        "baseline diff computed"
    );

    Ok(BaselineDiff {
        tools_added,
        tools_removed,
        tools_modified,
        workflows_regressed,
        severity,
        version_compatibility,
    })
}

fn diff_tool(
    old: &Baseline,
    new: &Baseline,
    old_fp: &ToolFingerprint,
    new_fp: &ToolFingerprint,
    options: CompareOptions,
) -> ToolModification {
    let mut changes: Vec<AspectChange> = Vec::new();
    let schema_changed = old_fp.schema_hash != new_fp.schema_hash;

    if schema_changed {
        let old_schema = old
            .tool_summary(&old_fp.name)
            .and_then(|t| t.input_schema.as_ref());
        let new_schema = new
            .tool_summary(&new_fp.name)
            .and_then(|t| t.input_schema.as_ref());
        match (old_schema, new_schema) {
            (Some(old_schema), Some(new_schema)) => {
                for change in compare_schemas(old_schema, new_schema, options) {
                    changes.push(AspectChange {
                        aspect: change.kind.to_string(),
                        description: if change.path.is_empty() {
                            change.description
                        } else {
                            format!("{}: {}", change.path, change.description)
                        },
                        significance: if change.breaking {
                            DiffSeverity::Breaking
                        } else {
                            DiffSeverity::Warning
                        },
                    });
                }
            }
            _ => {
                // Schemas were not retained; the hash says they differ.
                changes.push(AspectChange {
                    aspect: "schema".into(),
                    description: format!(
                        "schema hash changed from {} to {}",
                        old_fp.schema_hash, new_fp.schema_hash
                    ),
                    significance: DiffSeverity::Warning,
                });
            }
        }
    }

    if old_fp.description != new_fp.description {
        changes.push(AspectChange {
            aspect: "description".into(),
            description: "tool description changed".into(),
            significance: DiffSeverity::Info,
        });
    }

    // destructiveHint appearing on a previously unannotated tool is a
    // warning-grade behavioral signal.
    let old_destructive = old
        .tool_summary(&old_fp.name)
        .and_then(|t| t.annotations.as_ref())
        .and_then(|a| a.destructive_hint)
        .unwrap_or(false);
    let new_destructive = new
        .tool_summary(&new_fp.name)
        .and_then(|t| t.annotations.as_ref())
        .and_then(|a| a.destructive_hint)
        .unwrap_or(false);
    if new_destructive && !old_destructive {
        changes.push(AspectChange {
            aspect: "annotations".into(),
            description: "tool is now marked destructive".into(),
            significance: DiffSeverity::Warning,
        });
    }

    changes.extend(diff_ordered_set(
        "assertions",
        &old_fp.assertions,
        &new_fp.assertions,
        DiffSeverity::Info,
    ));
    // New security findings escalate to warning; resolved ones are info.
    changes.extend(diff_ordered_set(
        "securityNotes",
        &old_fp.security_notes,
        &new_fp.security_notes,
        DiffSeverity::Warning,
    ));
    changes.extend(diff_ordered_set(
        "limitations",
        &old_fp.limitations,
        &new_fp.limitations,
        DiffSeverity::Info,
    ));

    ToolModification {
        tool: old_fp.name.clone(),
        schema_changed,
        changes,
    }
}

/// Diff two ordered string sets; additions carry `added_significance`,
/// removals are informational.
fn diff_ordered_set(
    aspect: &str,
    old: &[String],
    new: &[String],
    added_significance: DiffSeverity,
) -> Vec<AspectChange> {
    let old_set: BTreeSet<&String> = old.iter().collect();
    let new_set: BTreeSet<&String> = new.iter().collect();
    let mut changes = Vec::new();

    for added in new_set.difference(&old_set) {
        changes.push(AspectChange {
            aspect: aspect.to_string(),
            description: format!("new: {}", added),
            significance: added_significance,
        });
    }
    for removed in old_set.difference(&new_set) {
        changes.push(AspectChange {
            aspect: aspect.to_string(),
            description: format!("no longer observed: {}", removed),
            significance: DiffSeverity::Info,
        });
    }
    changes
}

fn rollup(
    added: &[String],
    removed: &[String],
    modified: &[ToolModification],
    workflows_regressed: &[String],
) -> DiffSeverity {
    let max_change = modified
        .iter()
        .flat_map(|m| m.changes.iter())
        .map(|c| c.significance)
        .max()
        .unwrap_or(DiffSeverity::Clean);

    if !removed.is_empty() || !workflows_regressed.is_empty() || max_change == DiffSeverity::Breaking
    {
        return DiffSeverity::Breaking;
    }
    if max_change == DiffSeverity::Warning {
        return DiffSeverity::Warning;
    }
    if !added.is_empty() || max_change == DiffSeverity::Info {
        return DiffSeverity::Info;
    }
    DiffSeverity::Clean
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{
        BaselineCapabilities, BaselineMetadata, BaselineServer, FORMAT_VERSION, RunSummary,
        ToolSummary, WorkflowSignature,
    };
    use crate::baseline::builder::compute_hash;
    use serde_json::{Value, json};

    fn fingerprint(name: &str, schema: &Value) -> ToolFingerprint {
        ToolFingerprint {
            name: name.into(),
            description: String::new(),
            schema_hash: crate::schema::schema_hash(schema),
            assertions: vec![],
            security_notes: vec![],
            limitations: vec![],
            last_tested_at: "2024-01-01T00:00:00Z".into(),
            input_schema_hash_at_test: crate::schema::schema_hash(schema),
            error_patterns: vec![],
        }
    }

    fn baseline(tools: Vec<(&str, Value)>) -> Baseline {
        let mut b = Baseline {
            version: FORMAT_VERSION.into(),
            metadata: BaselineMetadata {
                mode: "check".into(),
                generated_at: "2024-01-01T00:00:00Z".into(),
                server_command: "server".into(),
                duration_ms: 0,
                cancelled: false,
            },
            server: BaselineServer::default(),
            capabilities: BaselineCapabilities {
                tools: tools
                    .iter()
                    .map(|(name, schema)| ToolSummary {
                        name: name.to_string(),
                        description: String::new(),
                        input_schema: Some(schema.clone()),
                        annotations: None,
                    })
                    .collect(),
            },
            tool_profiles: tools
                .iter()
                .map(|(name, schema)| fingerprint(name, schema))
                .collect(),
            workflow_signatures: vec![],
            summary: RunSummary::default(),
            hash: String::new(),
        };
        b.tool_profiles.sort_by(|x, y| x.name.cmp(&y.name));
        b.capabilities.tools.sort_by(|x, y| x.name.cmp(&y.name));
        b.hash = compute_hash(&b);
        b
    }

    fn search_schema() -> Value {
        json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        })
    }

    #[test]
    fn test_diff_reflexivity() {
        let b = baseline(vec![("search", search_schema())]);
        let diff = diff_baselines(&b, &b, &DiffPolicy::default()).unwrap();
        assert_eq!(diff.severity, DiffSeverity::Clean);
        assert!(diff.tools_added.is_empty());
        assert!(diff.tools_removed.is_empty());
        assert!(diff.tools_modified.is_empty());
    }

    #[test]
    fn test_required_addition_is_breaking() {
        let old = baseline(vec![("search", search_schema())]);
        let new = baseline(vec![(
            "search",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "api_key": {"type": "string"}
                },
                "required": ["api_key", "query"]
            }),
        )]);
        let diff = diff_baselines(&old, &new, &DiffPolicy::default()).unwrap();
        assert_eq!(diff.severity, DiffSeverity::Breaking);
        let modification = &diff.tools_modified[0];
        assert!(modification.schema_changed);
        assert!(
            modification
                .changes
                .iter()
                .any(|c| c.aspect == "required_changed"
                    && c.significance == DiffSeverity::Breaking)
        );
    }

    #[test]
    fn test_optional_addition_is_warning() {
        let old = baseline(vec![("search", search_schema())]);
        let new = baseline(vec![(
            "search",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "number", "default": 10}
                },
                "required": ["query"]
            }),
        )]);
        let diff = diff_baselines(&old, &new, &DiffPolicy::default()).unwrap();
        assert_eq!(diff.severity, DiffSeverity::Warning);
        assert!(
            diff.tools_modified[0]
                .changes
                .iter()
                .any(|c| c.aspect == "property_added")
        );
    }

    #[test]
    fn test_tool_added_is_info() {
        let old = baseline(vec![]);
        let new = baseline(vec![("ping", json!({"type": "object", "properties": {}}))]);
        let diff = diff_baselines(&old, &new, &DiffPolicy::default()).unwrap();
        assert_eq!(diff.tools_added, vec!["ping"]);
        assert_eq!(diff.severity, DiffSeverity::Info);
    }

    #[test]
    fn test_tool_removed_is_breaking() {
        let old = baseline(vec![("ping", json!({"type": "object", "properties": {}}))]);
        let new = baseline(vec![]);
        let diff = diff_baselines(&old, &new, &DiffPolicy::default()).unwrap();
        assert_eq!(diff.tools_removed, vec!["ping"]);
        assert_eq!(diff.severity, DiffSeverity::Breaking);
    }

    #[test]
    fn test_verdict_antisymmetry_for_removal() {
        let with_tool = baseline(vec![("ping", json!({"type": "object", "properties": {}}))]);
        let without = baseline(vec![]);
        let forward = diff_baselines(&with_tool, &without, &DiffPolicy::default()).unwrap();
        assert_eq!(forward.severity, DiffSeverity::Breaking);
        let backward = diff_baselines(&without, &with_tool, &DiffPolicy::default()).unwrap();
        assert!(backward.severity <= DiffSeverity::Info);
    }

    #[test]
    fn test_enum_contraction_is_breaking() {
        let old = baseline(vec![(
            "set_status",
            json!({
                "type": "object",
                "properties": {"status": {"type": "string", "enum": ["active", "inactive", "pending"]}},
                "required": ["status"]
            }),
        )]);
        let new = baseline(vec![(
            "set_status",
            json!({
                "type": "object",
                "properties": {"status": {"type": "string", "enum": ["active", "inactive"]}},
                "required": ["status"]
            }),
        )]);
        let diff = diff_baselines(&old, &new, &DiffPolicy::default()).unwrap();
        assert_eq!(diff.severity, DiffSeverity::Breaking);
        assert!(
            diff.tools_modified[0]
                .changes
                .iter()
                .any(|c| c.aspect == "enum_changed" && c.significance == DiffSeverity::Breaking)
        );
    }

    #[test]
    fn test_workflow_regression_is_breaking() {
        let mut old = baseline(vec![("ping", json!({"type": "object", "properties": {}}))]);
        old.workflow_signatures = vec![WorkflowSignature {
            name: "user-roundtrip".into(),
            tool_sequence: vec!["create_user".into(), "get_user".into()],
            succeeded: true,
            key_outputs: vec![],
        }];
        let mut new = old.clone();
        new.workflow_signatures[0].succeeded = false;
        old.hash = compute_hash(&old);
        new.hash = compute_hash(&new);

        let diff = diff_baselines(&old, &new, &DiffPolicy::default()).unwrap();
        assert_eq!(diff.severity, DiffSeverity::Breaking);
        assert_eq!(diff.workflows_regressed, vec!["user-roundtrip"]);
    }

    #[test]
    fn test_new_security_finding_is_warning() {
        let old = baseline(vec![("search", search_schema())]);
        let mut new = baseline(vec![("search", search_schema())]);
        new.tool_profiles[0].security_notes =
            vec!["echoes xss payload unsanitized".into()];
        new.hash = compute_hash(&new);
        let diff = diff_baselines(&old, &new, &DiffPolicy::default()).unwrap();
        assert_eq!(diff.severity, DiffSeverity::Warning);
    }

    #[test]
    fn test_version_gate() {
        let old = baseline(vec![]);
        let mut new = baseline(vec![]);
        new.version = "2.0".into();
        assert!(matches!(
            diff_baselines(&old, &new, &DiffPolicy::default()),
            Err(BellwetherError::VersionMismatch { .. })
        ));

        let policy = DiffPolicy {
            allow_version_mismatch: true,
            ..Default::default()
        };
        let diff = diff_baselines(&old, &new, &policy).unwrap();
        assert!(diff.version_compatibility.is_some());
    }

    #[test]
    fn test_cancelled_baseline_refused() {
        let old = baseline(vec![]);
        let mut cancelled = baseline(vec![]);
        cancelled.metadata.cancelled = true;
        assert!(matches!(
            diff_baselines(&old, &cancelled, &DiffPolicy::default()),
            Err(BellwetherError::CancelledBaseline)
        ));

        let policy = DiffPolicy {
            allow_cancelled: true,
            ..Default::default()
        };
        assert!(diff_baselines(&old, &cancelled, &policy).is_ok());
    }

    #[test]
    fn test_description_change_is_info() {
        let old = baseline(vec![("search", search_schema())]);
        let mut new = baseline(vec![("search", search_schema())]);
        new.tool_profiles[0].description = "Improved search".into();
        new.hash = compute_hash(&new);
        let diff = diff_baselines(&old, &new, &DiffPolicy::default()).unwrap();
        assert_eq!(diff.severity, DiffSeverity::Info);
    }
}
