// tests/baseline_diff.rs
// Drift classification scenarios and baseline document properties

use serde_json::{Value, json};

use bellwether::baseline::builder::{compute_hash, load_baseline, save_baseline};
use bellwether::baseline::differ::diff_baselines;
use bellwether::baseline::{
    Baseline, BaselineCapabilities, BaselineMetadata, BaselineServer, DiffSeverity,
    FORMAT_VERSION, RunSummary, ToolFingerprint, ToolSummary,
};
use bellwether::config::DiffPolicy;
use bellwether::schema::schema_hash;

fn baseline_with_tools(tools: Vec<(&str, Value)>) -> Baseline {
    let mut capabilities: Vec<ToolSummary> = tools
        .iter()
        .map(|(name, schema)| ToolSummary {
            name: name.to_string(),
            description: String::new(),
            input_schema: Some(schema.clone()),
            annotations: None,
        })
        .collect();
    capabilities.sort_by(|a, b| a.name.cmp(&b.name));

    let mut profiles: Vec<ToolFingerprint> = tools
        .iter()
        .map(|(name, schema)| ToolFingerprint {
            name: name.to_string(),
            description: String::new(),
            schema_hash: schema_hash(schema),
            assertions: vec!["happy_path: all scenarios pass".into()],
            security_notes: vec![],
            limitations: vec![],
            last_tested_at: "2024-01-01T00:00:00Z".into(),
            input_schema_hash_at_test: schema_hash(schema),
            error_patterns: vec![],
        })
        .collect();
    profiles.sort_by(|a, b| a.name.cmp(&b.name));

    let mut baseline = Baseline {
        version: FORMAT_VERSION.into(),
        metadata: BaselineMetadata {
            mode: "check".into(),
            generated_at: "2024-01-01T00:00:00Z".into(),
            server_command: "npx mock-server".into(),
            duration_ms: 100,
            cancelled: false,
        },
        server: BaselineServer {
            name: "mock".into(),
            version: "1.0.0".into(),
            protocol_version: "2025-06-18".into(),
            capabilities: vec!["tools".into()],
        },
        capabilities: BaselineCapabilities {
            tools: capabilities,
        },
        tool_profiles: profiles,
        workflow_signatures: vec![],
        summary: RunSummary::default(),
        hash: String::new(),
    };
    baseline.hash = compute_hash(&baseline);
    baseline
}

fn search_v1() -> Value {
    json!({
        "type": "object",
        "properties": {"query": {"type": "string"}},
        "required": ["query"]
    })
}

// ============================================================================
// Required parameter added -> breaking
// ============================================================================

#[test]
fn test_required_addition_is_breaking() {
    let a = baseline_with_tools(vec![("search", search_v1())]);
    let b = baseline_with_tools(vec![(
        "search",
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "api_key": {"type": "string"}
            },
            "required": ["query", "api_key"]
        }),
    )]);

    let diff = diff_baselines(&a, &b, &DiffPolicy::default()).unwrap();
    assert_eq!(diff.severity, DiffSeverity::Breaking);
    let modification = &diff.tools_modified[0];
    assert_eq!(modification.tool, "search");
    assert!(modification.schema_changed);
    assert!(
        modification
            .changes
            .iter()
            .any(|c| c.aspect == "required_changed" && c.significance == DiffSeverity::Breaking)
    );
}

// ============================================================================
// Optional parameter added -> warning
// ============================================================================

#[test]
fn test_optional_addition_is_warning() {
    let a = baseline_with_tools(vec![("search", search_v1())]);
    let b = baseline_with_tools(vec![(
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

    let diff = diff_baselines(&a, &b, &DiffPolicy::default()).unwrap();
    assert_eq!(diff.severity, DiffSeverity::Warning);
    assert!(
        diff.tools_modified[0]
            .changes
            .iter()
            .any(|c| c.aspect == "property_added")
    );
}

// ============================================================================
// Tool added -> info, tool removed -> breaking
// ============================================================================

#[test]
fn test_tool_added_is_info() {
    let a = baseline_with_tools(vec![]);
    let b = baseline_with_tools(vec![("ping", json!({"type": "object", "properties": {}}))]);
    let diff = diff_baselines(&a, &b, &DiffPolicy::default()).unwrap();
    assert_eq!(diff.tools_added, vec!["ping"]);
    assert!(diff.tools_removed.is_empty());
    assert_eq!(diff.severity, DiffSeverity::Info);
}

#[test]
fn test_tool_removed_is_breaking() {
    let a = baseline_with_tools(vec![("ping", json!({"type": "object", "properties": {}}))]);
    let b = baseline_with_tools(vec![]);
    let diff = diff_baselines(&a, &b, &DiffPolicy::default()).unwrap();
    assert_eq!(diff.tools_removed, vec!["ping"]);
    assert_eq!(diff.severity, DiffSeverity::Breaking);
}

// ============================================================================
// Enum contraction -> breaking
// ============================================================================

#[test]
fn test_enum_contraction_is_breaking() {
    let status = |values: Vec<&str>| {
        json!({
            "type": "object",
            "properties": {"status": {"type": "string", "enum": values}},
            "required": ["status"]
        })
    };
    let a = baseline_with_tools(vec![("set_status", status(vec!["active", "inactive", "pending"]))]);
    let b = baseline_with_tools(vec![("set_status", status(vec!["active", "inactive"]))]);

    let diff = diff_baselines(&a, &b, &DiffPolicy::default()).unwrap();
    assert_eq!(diff.severity, DiffSeverity::Breaking);
    assert!(
        diff.tools_modified[0]
            .changes
            .iter()
            .any(|c| c.aspect == "enum_changed" && c.significance == DiffSeverity::Breaking)
    );
}

// ============================================================================
// Reflexivity, antisymmetry, round-trip, ordering
// ============================================================================

#[test]
fn test_diff_reflexivity() {
    let b = baseline_with_tools(vec![
        ("search", search_v1()),
        ("ping", json!({"type": "object", "properties": {}})),
    ]);
    let diff = diff_baselines(&b, &b, &DiffPolicy::default()).unwrap();
    assert_eq!(diff.severity, DiffSeverity::Clean);
    assert!(diff.tools_added.is_empty());
    assert!(diff.tools_removed.is_empty());
    assert!(diff.tools_modified.is_empty());
}

#[test]
fn test_diff_antisymmetry_on_removal() {
    let with_tool = baseline_with_tools(vec![("ping", json!({"type": "object", "properties": {}}))]);
    let without = baseline_with_tools(vec![]);

    let forward = diff_baselines(&with_tool, &without, &DiffPolicy::default()).unwrap();
    assert_eq!(forward.severity, DiffSeverity::Breaking);

    let backward = diff_baselines(&without, &with_tool, &DiffPolicy::default()).unwrap();
    assert!(backward.severity <= DiffSeverity::Info);
    assert_eq!(backward.tools_added, vec!["ping"]);
}

#[test]
fn test_baseline_round_trip_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("baseline.json");
    let baseline = baseline_with_tools(vec![("search", search_v1())]);

    save_baseline(&baseline, &path).unwrap();
    let loaded = load_baseline(&path).unwrap();
    assert_eq!(loaded, baseline);
    assert_eq!(compute_hash(&loaded), baseline.hash);
}

#[test]
fn test_serialized_form_is_stable() {
    let baseline = baseline_with_tools(vec![("search", search_v1())]);
    let first = serde_json::to_string_pretty(&baseline).unwrap();
    let second = serde_json::to_string_pretty(&baseline).unwrap();
    assert_eq!(first, second);

    // hash is the final top-level key
    let tail = first.rfind('}').map(|i| &first[..i]).unwrap_or(&first);
    let last_key_position = ["\"version\"", "\"metadata\"", "\"server\"", "\"hash\""]
        .iter()
        .map(|key| tail.rfind(*key).unwrap_or(0))
        .max()
        .unwrap_or(0);
    assert!(first[last_key_position..].starts_with("\"hash\""));
}

#[test]
fn test_profiles_sorted_by_name() {
    let baseline = baseline_with_tools(vec![
        ("zeta", json!({"type": "object", "properties": {}})),
        ("alpha", json!({"type": "object", "properties": {}})),
        ("mid", json!({"type": "object", "properties": {}})),
    ]);
    let names: Vec<&str> = baseline
        .tool_profiles
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[test]
fn test_schema_hash_permutation_stability_through_baseline() {
    let permuted = json!({
        "required": ["query"],
        "properties": {"query": {"type": "string"}},
        "type": "object"
    });
    let a = baseline_with_tools(vec![("search", search_v1())]);
    let b = baseline_with_tools(vec![("search", permuted)]);
    // Key order is not drift.
    let diff = diff_baselines(&a, &b, &DiffPolicy::default()).unwrap();
    assert_eq!(diff.severity, DiffSeverity::Clean);
}
