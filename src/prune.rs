// src/prune.rs
// Per-tool pruning: characteristics, priority scoring, category decisions

use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::baseline::{Baseline, ToolFingerprint};
use crate::error::Result;
use crate::protocol::McpTool;
use crate::scenario::{Category, tool_params};
use crate::schema::schema_hash_opt;

static EXTERNAL_DEP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(api|http|https|fetch|web|remote|network|url|download|upload|cloud|external|internet)\b")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Observable shape of one tool, extracted before deciding what to run.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCharacteristics {
    pub param_count: usize,
    pub required_count: usize,
    pub has_numeric: bool,
    pub has_enum: bool,
    pub has_optional: bool,
    pub has_string: bool,
    pub max_nesting_depth: usize,
    pub external_dependency: bool,
    /// Error density from the prior fingerprint, 0.0..=1.0.
    pub error_rate: f64,
    pub hours_since_test: Option<f64>,
    pub consecutive_successes: u32,
}

/// Extract characteristics from the tool shape and cached history.
pub fn characteristics(tool: &McpTool, prior: Option<&ToolFingerprint>) -> ToolCharacteristics {
    let params = tool_params(tool);
    let schema = tool.schema();

    let error_count: u32 = prior
        .map(|f| f.error_patterns.iter().map(|p| p.count).sum())
        .unwrap_or(0);
    let error_rate = (f64::from(error_count) / 10.0).min(1.0);

    let hours_since_test = prior.and_then(|f| {
        chrono::DateTime::parse_from_rfc3339(&f.last_tested_at)
            .ok()
            .map(|t| (chrono::Utc::now() - t.with_timezone(&chrono::Utc)).num_minutes() as f64 / 60.0)
    });

    // A clean prior run counts as one consecutive success; errors reset it.
    let consecutive_successes = match prior {
        Some(f) if f.error_patterns.is_empty() => 1,
        _ => 0,
    };

    let haystack = format!("{} {}", tool.name, tool.description_or_empty());

    ToolCharacteristics {
        param_count: params.len(),
        required_count: params.iter().filter(|p| p.required).count(),
        has_numeric: params.iter().any(|p| p.is_numeric()),
        has_enum: params.iter().any(|p| p.enum_values().is_some()),
        has_optional: params.iter().any(|p| !p.required),
        has_string: params.iter().any(|p| p.is_string()),
        max_nesting_depth: nesting_depth(&schema, 0),
        external_dependency: EXTERNAL_DEP.is_match(&haystack),
        error_rate,
        hours_since_test,
        consecutive_successes,
    }
}

fn nesting_depth(schema: &Value, depth: usize) -> usize {
    if depth > 16 {
        return depth;
    }
    let mut max = depth;
    if let Some(props) = schema.get("properties").and_then(|v| v.as_object()) {
        for child in props.values() {
            max = max.max(nesting_depth(child, depth + 1));
        }
    }
    if let Some(items) = schema.get("items") {
        max = max.max(nesting_depth(items, depth + 1));
    }
    max
}

/// Tool priority in [0, 100]: base 50, raised by error history, external
/// dependencies, schema complexity and staleness; lowered by a run of clean
/// passes.
pub fn priority_score(c: &ToolCharacteristics) -> u8 {
    let mut score = 50.0;

    score += c.error_rate * 30.0;
    if c.external_dependency {
        score += 15.0;
    }
    if c.param_count > 5 {
        score += 10.0;
    }
    if c.max_nesting_depth > 2 {
        score += 5.0;
    }
    match c.hours_since_test {
        Some(hours) if hours > 72.0 => score += 15.0,
        Some(hours) if hours > 24.0 => score += 10.0,
        _ => {}
    }
    score -= f64::from(c.consecutive_successes.min(2)) * 10.0;

    score.clamp(0.0, 100.0) as u8
}

/// Decision for one category of one tool.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryDecision {
    pub category: Category,
    pub run: bool,
    pub reason: String,
}

/// The pruner's verdict for one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolPruningDecision {
    pub tool_name: String,
    pub priority: u8,
    pub categories: Vec<CategoryDecision>,
}

impl ToolPruningDecision {
    pub fn enabled_categories(&self) -> Vec<Category> {
        self.categories
            .iter()
            .filter(|d| d.run)
            .map(|d| d.category)
            .collect()
    }
}

/// Re-enable order when the skip cap is exceeded, least valuable first.
const REENABLE_ORDER: [Category; 5] = [
    Category::Semantic,
    Category::OptionalCombinations,
    Category::Boundary,
    Category::Security,
    Category::Enum,
];

/// Decide which categories run for a tool.
pub fn decide(
    tool: &McpTool,
    prior: Option<&ToolFingerprint>,
    max_skipped: usize,
) -> ToolPruningDecision {
    let c = characteristics(tool, prior);
    let priority = priority_score(&c);

    let mut categories = vec![
        CategoryDecision {
            category: Category::HappyPath,
            run: true,
            reason: "always runs".into(),
        },
        CategoryDecision {
            category: Category::ErrorHandling,
            run: true,
            reason: "always runs".into(),
        },
        CategoryDecision {
            category: Category::Boundary,
            run: c.has_numeric && priority >= 40,
            reason: if !c.has_numeric {
                "no numeric parameters".into()
            } else if priority < 40 {
                format!("priority {} below 40", priority)
            } else {
                "numeric parameters present".into()
            },
        },
        CategoryDecision {
            category: Category::Enum,
            run: c.has_enum,
            reason: if c.has_enum {
                "enum parameters present".into()
            } else {
                "no enum parameters".into()
            },
        },
        CategoryDecision {
            category: Category::OptionalCombinations,
            run: c.has_optional && priority >= 60,
            reason: if !c.has_optional {
                "no optional parameters".into()
            } else if priority < 60 {
                format!("priority {} below 60", priority)
            } else {
                "optional parameters present".into()
            },
        },
        CategoryDecision {
            category: Category::Security,
            run: c.has_string && (priority >= 30 || c.external_dependency),
            reason: if !c.has_string {
                "no string parameters".into()
            } else if c.external_dependency {
                "external dependency".into()
            } else if priority >= 30 {
                "string parameters present".into()
            } else {
                format!("priority {} below 30", priority)
            },
        },
        CategoryDecision {
            category: Category::Semantic,
            run: priority >= 50,
            reason: if priority >= 50 {
                "priority at or above 50".into()
            } else {
                format!("priority {} below 50", priority)
            },
        },
    ];

    // Cap skipped categories; re-enable the least valuable skips until the
    // cap is met.
    let mut skipped = categories.iter().filter(|d| !d.run).count();
    if skipped > max_skipped {
        for category in REENABLE_ORDER {
            if skipped <= max_skipped {
                break;
            }
            if let Some(decision) = categories
                .iter_mut()
                .find(|d| d.category == category && !d.run)
            {
                decision.run = true;
                decision.reason = format!("re-enabled: skip cap {} exceeded", max_skipped);
                skipped -= 1;
            }
        }
    }

    debug!(
        tool = %tool.name,
        priority,
        enabled = ?categories.iter().filter(|d| d.run).map(|d| d.category.as_str()).collect::<Vec<_>>(),
        "pruning decision"
    );

    ToolPruningDecision {
        tool_name: tool.name.clone(),
        priority,
        categories,
    }
}

/// Run-start incremental filter: a tool whose schema hash is unchanged and
/// whose prior test is fresh enough is skipped, its fingerprint carried
/// forward verbatim.
pub fn incremental_skip<'a>(
    tool: &McpTool,
    prior: Option<&'a Baseline>,
    max_age_hours: u64,
) -> Option<&'a ToolFingerprint> {
    let fingerprint = prior?.fingerprint(&tool.name)?;
    let current_hash = schema_hash_opt(tool.input_schema.as_ref());
    if fingerprint.schema_hash != current_hash {
        return None;
    }
    let tested_at = chrono::DateTime::parse_from_rfc3339(&fingerprint.last_tested_at).ok()?;
    let age = chrono::Utc::now() - tested_at.with_timezone(&chrono::Utc);
    if age.num_hours() >= 0 && (age.num_hours() as u64) < max_age_hours {
        Some(fingerprint)
    } else {
        None
    }
}

/// Append-only JSONL log of pruning decisions. Opened at run start, dropped
/// at run end; the single process-wide decision artifact.
pub struct DecisionLog {
    file: Option<std::fs::File>,
}

impl DecisionLog {
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Some(
                    std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)?,
                )
            }
            None => None,
        };
        Ok(Self { file })
    }

    pub fn disabled() -> Self {
        Self { file: None }
    }

    pub fn record(&mut self, decision: &ToolPruningDecision) {
        if let Some(file) = &mut self.file
            && let Ok(line) = serde_json::to_string(decision)
        {
            let _ = writeln!(file, "{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, description: &str, schema: Value) -> McpTool {
        serde_json::from_value(json!({
            "name": name,
            "description": description,
            "inputSchema": schema
        }))
        .unwrap()
    }

    fn plain_tool() -> McpTool {
        tool(
            "format_text",
            "Formats text locally",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
        )
    }

    #[test]
    fn test_base_priority_without_history() {
        let c = characteristics(&plain_tool(), None);
        assert_eq!(priority_score(&c), 50);
    }

    #[test]
    fn test_external_dependency_detection() {
        let fetcher = tool(
            "fetch_page",
            "Downloads a web page over HTTP",
            json!({"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]}),
        );
        let c = characteristics(&fetcher, None);
        assert!(c.external_dependency);
        assert!(priority_score(&c) > 50);
    }

    #[test]
    fn test_clean_history_lowers_priority() {
        let prior = ToolFingerprint {
            name: "format_text".into(),
            description: String::new(),
            schema_hash: "x".into(),
            assertions: vec![],
            security_notes: vec![],
            limitations: vec![],
            last_tested_at: chrono::Utc::now().to_rfc3339(),
            input_schema_hash_at_test: "x".into(),
            error_patterns: vec![],
        };
        let c = characteristics(&plain_tool(), Some(&prior));
        assert_eq!(c.consecutive_successes, 1);
        assert!(priority_score(&c) < 50);
    }

    #[test]
    fn test_error_history_raises_priority() {
        let prior = ToolFingerprint {
            name: "format_text".into(),
            description: String::new(),
            schema_hash: "x".into(),
            assertions: vec![],
            security_notes: vec![],
            limitations: vec![],
            last_tested_at: chrono::Utc::now().to_rfc3339(),
            input_schema_hash_at_test: "x".into(),
            error_patterns: vec![crate::baseline::ErrorPattern {
                category: "happy_path".into(),
                count: 5,
            }],
        };
        let c = characteristics(&plain_tool(), Some(&prior));
        assert!(c.error_rate > 0.0);
        assert!(priority_score(&c) > 50);
    }

    #[test]
    fn test_happy_and_error_always_run() {
        let decision = decide(&plain_tool(), None, 3);
        for required in [Category::HappyPath, Category::ErrorHandling] {
            assert!(
                decision
                    .categories
                    .iter()
                    .find(|d| d.category == required)
                    .unwrap()
                    .run
            );
        }
    }

    #[test]
    fn test_enum_runs_iff_enum_params() {
        let decision = decide(&plain_tool(), None, 7);
        assert!(
            !decision
                .categories
                .iter()
                .find(|d| d.category == Category::Enum)
                .unwrap()
                .run
        );

        let with_enum = tool(
            "set_mode",
            "",
            json!({
                "type": "object",
                "properties": {"mode": {"type": "string", "enum": ["a", "b"]}},
                "required": ["mode"]
            }),
        );
        let decision = decide(&with_enum, None, 7);
        assert!(
            decision
                .categories
                .iter()
                .find(|d| d.category == Category::Enum)
                .unwrap()
                .run
        );
    }

    #[test]
    fn test_security_needs_string_params() {
        let numeric = tool(
            "add",
            "adds numbers",
            json!({
                "type": "object",
                "properties": {"a": {"type": "number"}},
                "required": ["a"]
            }),
        );
        let decision = decide(&numeric, None, 7);
        assert!(
            !decision
                .categories
                .iter()
                .find(|d| d.category == Category::Security)
                .unwrap()
                .run
        );
    }

    #[test]
    fn test_skip_cap_reenables() {
        // A tool that would skip boundary, enum, optional, security (priority
        // 40, no fitting params) exceeds a cap of 2 and must re-enable some.
        let decision = decide(&plain_tool(), None, 1);
        let skipped = decision.categories.iter().filter(|d| !d.run).count();
        assert!(skipped <= 1 + 2, "cap plus structurally impossible skips");
        assert!(
            decision
                .categories
                .iter()
                .any(|d| d.reason.contains("re-enabled"))
        );
    }

    #[test]
    fn test_incremental_skip_on_unchanged_fresh_schema() {
        let t = plain_tool();
        let hash = crate::schema::schema_hash_opt(t.input_schema.as_ref());
        let baseline = baseline_with_fingerprint(&t.name, &hash, chrono::Utc::now().to_rfc3339());
        assert!(incremental_skip(&t, Some(&baseline), 24).is_some());
    }

    #[test]
    fn test_incremental_no_skip_on_changed_schema() {
        let t = plain_tool();
        let baseline =
            baseline_with_fingerprint(&t.name, "different-hash", chrono::Utc::now().to_rfc3339());
        assert!(incremental_skip(&t, Some(&baseline), 24).is_none());
    }

    #[test]
    fn test_incremental_no_skip_on_stale_fingerprint() {
        let t = plain_tool();
        let hash = crate::schema::schema_hash_opt(t.input_schema.as_ref());
        let old = (chrono::Utc::now() - chrono::Duration::hours(48)).to_rfc3339();
        let baseline = baseline_with_fingerprint(&t.name, &hash, old);
        assert!(incremental_skip(&t, Some(&baseline), 24).is_none());
    }

    fn baseline_with_fingerprint(name: &str, hash: &str, tested_at: String) -> Baseline {
        Baseline {
            version: crate::baseline::FORMAT_VERSION.into(),
            metadata: crate::baseline::BaselineMetadata {
                mode: "check".into(),
                generated_at: tested_at.clone(),
                server_command: String::new(),
                duration_ms: 0,
                cancelled: false,
            },
            server: Default::default(),
            capabilities: Default::default(),
            tool_profiles: vec![ToolFingerprint {
                name: name.into(),
                description: String::new(),
                schema_hash: hash.into(),
                assertions: vec![],
                security_notes: vec![],
                limitations: vec![],
                last_tested_at: tested_at,
                input_schema_hash_at_test: hash.into(),
                error_patterns: vec![],
            }],
            workflow_signatures: vec![],
            summary: Default::default(),
            hash: String::new(),
        }
    }
}
