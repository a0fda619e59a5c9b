// src/oracle.rs
// Value oracle: synthesizes plausible arguments from parameter schemas

use serde_json::{Value, json};
use std::sync::LazyLock;
use regex::Regex;

/// Supplies example values for parameter schemas.
///
/// The deterministic check mode uses [`HeuristicOracle`]; the explore mode
/// substitutes an LLM-backed oracle with the identical contract. The
/// scheduler treats both the same.
pub trait ValueOracle: Send + Sync {
    /// One plausible value for a schema, steered by the parameter name.
    fn example_for(&self, schema: &Value, name_hint: &str) -> Value;

    /// Up to `n` distinct plausible values.
    fn alternatives(&self, schema: &Value, n: usize) -> Vec<Value>;
}

/// Semantic families recognized from parameter names and descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticHint {
    Date,
    Email,
    Url,
    Id,
    Phone,
    Amount,
    Month,
    Year,
    Path,
}

static HINT_PATTERNS: LazyLock<Vec<(SemanticHint, Regex)>> = LazyLock::new(|| {
    [
        (SemanticHint::Email, r"(?i)e[-_]?mail"),
        (SemanticHint::Url, r"(?i)\b(url|uri|link|endpoint|website)\b"),
        (SemanticHint::Phone, r"(?i)\b(phone|mobile|tel)\b"),
        (SemanticHint::Amount, r"(?i)\b(amount|price|cost|total|balance)\b"),
        (SemanticHint::Month, r"(?i)\bmonth\b"),
        (SemanticHint::Year, r"(?i)\byear\b"),
        (SemanticHint::Date, r"(?i)\b(date|time|timestamp|when|at|until|since)\b"),
        (SemanticHint::Path, r"(?i)\b(path|file|dir|directory|folder)\b"),
        (SemanticHint::Id, r"(?i)(^id$|_id$|^id_|\bidentifier\b|\buuid\b|\bkey\b)"),
    ]
    .into_iter()
    .map(|(hint, pattern)| {
        (hint, Regex::new(pattern).unwrap_or_else(|_| unreachable!("static pattern")))
    })
    .collect()
});

/// Detect the semantic family of a parameter from its name/description.
pub fn detect_hint(text: &str) -> Option<SemanticHint> {
    HINT_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(hint, _)| *hint)
}

/// Example value for a semantic family. All values are fixed so runs stay
/// deterministic.
pub fn semantic_example(hint: SemanticHint) -> Value {
    match hint {
        SemanticHint::Date => json!("2024-01-15"),
        SemanticHint::Email => json!("user@example.com"),
        SemanticHint::Url => json!("https://example.com/resource"),
        SemanticHint::Id => json!("example-id-001"),
        SemanticHint::Phone => json!("+15551234567"),
        SemanticHint::Amount => json!("42.50"),
        SemanticHint::Month => json!("2024-01"),
        SemanticHint::Year => json!(2024),
        SemanticHint::Path => json!("/tmp/example.txt"),
    }
}

/// Deterministic, schema-driven oracle used in check mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicOracle;

impl HeuristicOracle {
    fn string_example(&self, schema: &Value, name_hint: &str) -> Value {
        if let Some(hint) = detect_hint(name_hint)
            && let Value::String(s) = semantic_example(hint)
        {
            return self.fit_length(s, schema);
        }
        if let Some(format) = schema.get("format").and_then(|v| v.as_str()) {
            let by_format = match format {
                "date" => Some("2024-01-15"),
                "date-time" => Some("2024-01-15T12:00:00Z"),
                "email" => Some("user@example.com"),
                "uri" | "url" => Some("https://example.com/resource"),
                "uuid" => Some("00000000-0000-4000-8000-000000000001"),
                _ => None,
            };
            if let Some(s) = by_format {
                return self.fit_length(s.to_string(), schema);
            }
        }
        self.fit_length("example".to_string(), schema)
    }

    fn fit_length(&self, mut s: String, schema: &Value) -> Value {
        let min = schema
            .get("minLength")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let max = schema.get("maxLength").and_then(|v| v.as_u64()).map(|v| v as usize);
        while s.len() < min {
            s.push('x');
        }
        if let Some(max) = max
            && s.len() > max
        {
            s.truncate(max);
        }
        Value::String(s)
    }

    fn number_example(&self, schema: &Value, integer: bool) -> Value {
        let min = schema.get("minimum").and_then(|v| v.as_f64());
        let max = schema.get("maximum").and_then(|v| v.as_f64());
        let value = match (min, max) {
            (Some(min), Some(max)) => (min + max) / 2.0,
            (Some(min), None) => min + 1.0,
            (None, Some(max)) => max - 1.0,
            (None, None) => 42.0,
        };
        if integer {
            json!(value.round() as i64)
        } else {
            json!(value)
        }
    }

    fn value_for(&self, schema: &Value, name_hint: &str, depth: usize) -> Value {
        if depth > 8 {
            return Value::Null;
        }
        if let Some(values) = schema.get("enum").and_then(|v| v.as_array())
            && let Some(first) = values.first()
        {
            return first.clone();
        }
        if let Some(default) = schema.get("default") {
            return default.clone();
        }

        match schema.get("type").and_then(|v| v.as_str()) {
            Some("string") => self.string_example(schema, name_hint),
            Some("integer") => self.number_example(schema, true),
            Some("number") => self.number_example(schema, false),
            Some("boolean") => json!(true),
            Some("array") => {
                let item_schema = schema.get("items").cloned().unwrap_or(json!({}));
                json!([self.value_for(&item_schema, name_hint, depth + 1)])
            }
            Some("object") => {
                let mut out = serde_json::Map::new();
                let required: Vec<&str> = schema
                    .get("required")
                    .and_then(|v| v.as_array())
                    .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
                    .unwrap_or_default();
                if let Some(props) = schema.get("properties").and_then(|v| v.as_object()) {
                    for (name, prop_schema) in props {
                        if required.contains(&name.as_str()) {
                            out.insert(
                                name.clone(),
                                self.value_for(prop_schema, name, depth + 1),
                            );
                        }
                    }
                }
                Value::Object(out)
            }
            Some("null") => Value::Null,
            _ => {
                // Untyped: a semantic hint is the only signal available.
                detect_hint(name_hint)
                    .map(semantic_example)
                    .unwrap_or_else(|| json!("example"))
            }
        }
    }
}

impl ValueOracle for HeuristicOracle {
    fn example_for(&self, schema: &Value, name_hint: &str) -> Value {
        self.value_for(schema, name_hint, 0)
    }

    fn alternatives(&self, schema: &Value, n: usize) -> Vec<Value> {
        if let Some(values) = schema.get("enum").and_then(|v| v.as_array()) {
            return values.iter().take(n).cloned().collect();
        }
        match schema.get("type").and_then(|v| v.as_str()) {
            Some("string") => ["alpha", "beta", "gamma", "delta", "epsilon"]
                .iter()
                .take(n)
                .map(|s| json!(s))
                .collect(),
            Some("integer") | Some("number") => {
                (0..n as i64).map(|i| json!(i * 10 + 1)).collect()
            }
            Some("boolean") => [json!(true), json!(false)].into_iter().take(n).collect(),
            _ => (0..n).map(|_| self.example_for(schema, "")).collect(),
        }
    }
}
