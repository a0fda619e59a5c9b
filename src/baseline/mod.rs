// src/baseline/mod.rs
// Baseline document types: the versioned, content-hashed run artifact

pub mod builder;
pub mod differ;

pub use builder::BaselineBuilder;
pub use differ::{BaselineDiff, DiffSeverity, ToolModification, diff_baselines};

use serde::{Deserialize, Serialize};

/// Current baseline format version. Major bumps gate diffing (§ version gate);
/// the version is about the format, never the content.
pub const FORMAT_VERSION: &str = "1.0";

/// Parse the major component out of a format version string.
pub fn major_version(version: &str) -> Option<u32> {
    version.split('.').next()?.parse().ok()
}

/// The complete baseline document. Immutable once built; `hash` covers the
/// canonical body with transient fields elided.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Baseline {
    pub version: String,
    pub metadata: BaselineMetadata,
    pub server: BaselineServer,
    pub capabilities: BaselineCapabilities,
    /// Sorted by tool name.
    pub tool_profiles: Vec<ToolFingerprint>,
    /// Sorted by workflow name.
    pub workflow_signatures: Vec<WorkflowSignature>,
    pub summary: RunSummary,
    /// Content hash of the canonical document with this field elided.
    /// Serialized last by field order.
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BaselineMetadata {
    /// Run mode that produced this baseline ("check" for the core).
    pub mode: String,
    pub generated_at: String,
    pub server_command: String,
    pub duration_ms: u64,
    /// A cancelled run still emits its partial baseline, flagged here.
    #[serde(default)]
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BaselineServer {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
    /// Sorted capability group names.
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BaselineCapabilities {
    /// Sorted by tool name.
    pub tools: Vec<ToolSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolSummary {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Full input schema, retained so a later diff can re-run the structural
    /// comparison without the original server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<crate::protocol::ToolAnnotations>,
}

/// Per-tool portion of a baseline.
///
/// Invariant: `schema_hash` is a pure function of the tool's input schema
/// modulo canonicalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolFingerprint {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub schema_hash: String,
    /// Observed behaviors phrased as stable assertion strings, sorted.
    #[serde(default)]
    pub assertions: Vec<String>,
    /// Security observations (echoed payloads, accepted traversals), sorted.
    #[serde(default)]
    pub security_notes: Vec<String>,
    /// Behavioral limitations observed (accepted out-of-range values…), sorted.
    #[serde(default)]
    pub limitations: Vec<String>,
    pub last_tested_at: String,
    /// The schema hash at the time the tool was actually exercised. Differs
    /// from `schema_hash` only for fingerprints copied forward by the
    /// incremental analyzer.
    pub input_schema_hash_at_test: String,
    /// Error counts by scenario category, sorted by category.
    #[serde(default)]
    pub error_patterns: Vec<ErrorPattern>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPattern {
    pub category: String,
    pub count: u32,
}

/// Outcome signature of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSignature {
    pub name: String,
    pub tool_sequence: Vec<String>,
    pub succeeded: bool,
    /// Dotted paths of outputs later steps consumed, sorted.
    #[serde(default)]
    pub key_outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub tools_discovered: usize,
    pub tools_tested: usize,
    pub tools_skipped: usize,
    pub scenarios_run: usize,
    pub scenarios_passed: usize,
    pub scenarios_failed: usize,
}

impl Baseline {
    pub fn fingerprint(&self, tool: &str) -> Option<&ToolFingerprint> {
        self.tool_profiles.iter().find(|f| f.name == tool)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tool_profiles.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn tool_summary(&self, tool: &str) -> Option<&ToolSummary> {
        self.capabilities.tools.iter().find(|t| t.name == tool)
    }
}
