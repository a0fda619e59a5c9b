// src/state/mod.rs
// Tool role classification and state-type inference

pub mod deps;
pub mod snapshot;

pub use deps::{DependencyEdge, DependencyTracker};
pub use snapshot::{ChangeKind, Snapshot, StateChange, diff_snapshots, take_snapshot};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use regex::Regex;

use crate::protocol::McpTool;
use crate::scenario::tool_params;

static READER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(get|read|list|fetch|query|search|find|show|view|check|describe|inspect|retrieve|lookup|dump|snapshot|export)(_|$)")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

static WRITER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(create|add|insert|write|set|update|modify|delete|remove|drop|clear|reset|post|put|patch|save|store|upsert)(_|$)")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

static READER_DESCRIPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(returns|retrieves|reads|lists)\b")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

static WRITER_DESCRIPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(creates|writes|updates|deletes|modifies)\b")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

static PROBE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(list_|list$|get_all_|get_all$|dump_|dump$|snapshot_|snapshot$|export_)")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Role a tool plays with respect to server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRole {
    Reader,
    Writer,
    Both,
    Unknown,
}

/// Closed tag set of state families a tool touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
    Files,
    Database,
    Users,
    Sessions,
    Cache,
    Queue,
    Config,
    Resources,
}

impl StateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateType::Files => "files",
            StateType::Database => "database",
            StateType::Users => "users",
            StateType::Sessions => "sessions",
            StateType::Cache => "cache",
            StateType::Queue => "queue",
            StateType::Config => "config",
            StateType::Resources => "resources",
        }
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static STATE_KEYWORDS: LazyLock<Vec<(StateType, Regex)>> = LazyLock::new(|| {
    [
        (StateType::Files, r"(?i)\b(file|path|directory|folder|document)\b"),
        (StateType::Database, r"(?i)\b(database|db|table|record|row|sql|collection)\b"),
        (StateType::Users, r"(?i)\b(user|account|member|profile|customer)\b"),
        (StateType::Sessions, r"(?i)\b(session|login|auth|token)\b"),
        (StateType::Cache, r"(?i)\b(cache|cached|memo)\b"),
        (StateType::Queue, r"(?i)\b(queue|job|task|message|event)\b"),
        (StateType::Config, r"(?i)\b(config|setting|option|preference)\b"),
        (StateType::Resources, r"(?i)\b(resource|item|object|entity|entry)\b"),
    ]
    .into_iter()
    .map(|(state, pattern)| {
        (state, Regex::new(pattern).unwrap_or_else(|_| unreachable!("static pattern")))
    })
    .collect()
});

/// Classification of one tool.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub role: ToolRole,
    pub confidence: f64,
    /// State families inferred from name/description keywords, sorted.
    pub state_types: Vec<StateType>,
}

/// Classify a tool's role from its name and description.
///
/// Confidence: 0.8 when exactly one pattern set matches, 0.7 when both do,
/// 0.3 when neither.
pub fn classify(tool: &McpTool) -> Classification {
    let name = &tool.name;
    let description = tool.description_or_empty();

    let reads = READER_PATTERN.is_match(name) || READER_DESCRIPTION.is_match(description);
    let writes = WRITER_PATTERN.is_match(name) || WRITER_DESCRIPTION.is_match(description);

    let (role, confidence) = match (reads, writes) {
        (true, false) => (ToolRole::Reader, 0.8),
        (false, true) => (ToolRole::Writer, 0.8),
        (true, true) => (ToolRole::Both, 0.7),
        (false, false) => (ToolRole::Unknown, 0.3),
    };

    let haystack = format!("{} {}", name, description);
    let mut state_types: Vec<StateType> = STATE_KEYWORDS
        .iter()
        .filter(|(_, re)| re.is_match(&haystack))
        .map(|(state, _)| *state)
        .collect();
    state_types.sort_unstable();
    state_types.dedup();

    Classification {
        role,
        confidence,
        state_types,
    }
}

/// A probe is a reader whose name suggests a corpus view and which can be
/// called with empty arguments.
pub fn is_probe(tool: &McpTool) -> bool {
    if !PROBE_PATTERN.is_match(&tool.name) {
        return false;
    }
    let classification = classify(tool);
    if !matches!(classification.role, ToolRole::Reader | ToolRole::Both) {
        return false;
    }
    tool_params(tool).iter().all(|p| !p.required)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, description: &str) -> McpTool {
        serde_json::from_value(json!({
            "name": name,
            "description": description,
            "inputSchema": {"type": "object", "properties": {}}
        }))
        .unwrap()
    }

    #[test]
    fn test_reader_classification() {
        let c = classify(&tool("get_user", "Fetch one user"));
        assert_eq!(c.role, ToolRole::Reader);
        assert_eq!(c.confidence, 0.8);
    }

    #[test]
    fn test_writer_classification() {
        let c = classify(&tool("create_user", "Adds a user"));
        assert_eq!(c.role, ToolRole::Writer);
        assert_eq!(c.confidence, 0.8);
    }

    #[test]
    fn test_both_classification() {
        let c = classify(&tool("update_index", "Updates and returns the index"));
        assert_eq!(c.role, ToolRole::Both);
        assert_eq!(c.confidence, 0.7);
    }

    #[test]
    fn test_unknown_classification() {
        let c = classify(&tool("frobnicate", "Does something"));
        assert_eq!(c.role, ToolRole::Unknown);
        assert_eq!(c.confidence, 0.3);
    }

    #[test]
    fn test_state_type_inference() {
        let c = classify(&tool("create_user", "Adds a user account to the database"));
        assert!(c.state_types.contains(&StateType::Users));
        assert!(c.state_types.contains(&StateType::Database));
    }

    #[test]
    fn test_state_types_sorted_deduped() {
        let c = classify(&tool("get_user_user", "user user user"));
        let mut sorted = c.state_types.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(c.state_types, sorted);
    }

    #[test]
    fn test_probe_detection() {
        assert!(is_probe(&tool("list_users", "Lists all users")));
        assert!(is_probe(&tool("get_all_items", "Returns every item")));
        assert!(is_probe(&tool("dump_state", "Dumps internal state")));
        assert!(!is_probe(&tool("get_user", "Fetch one user")));
        assert!(!is_probe(&tool("create_user", "Adds a user")));
    }

    #[test]
    fn test_probe_requires_no_required_params() {
        let needy: McpTool = serde_json::from_value(json!({
            "name": "list_files",
            "description": "Lists files in a directory",
            "inputSchema": {
                "type": "object",
                "properties": {"dir": {"type": "string"}},
                "required": ["dir"]
            }
        }))
        .unwrap();
        assert!(!is_probe(&needy));
    }
}
