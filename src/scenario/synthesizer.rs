// src/scenario/synthesizer.rs
// Builds the per-tool catalog of deterministic test cases

use serde_json::{Map, Value, json};

use super::security::PAYLOADS;
use super::{Assertion, Catalog, Category, ExpectedOutcome, Priority, Scenario};
use crate::oracle::{ValueOracle, detect_hint, semantic_example};
use crate::protocol::McpTool;

/// String parameters probed with security payloads, per tool. Bounds the
/// catalog on tools with many free-form inputs.
const MAX_SECURITY_PARAMS: usize = 2;

/// Type-wrong probes per tool.
const MAX_TYPE_WRONG: usize = 4;

/// One parameter extracted from a tool's input schema.
#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: String,
    pub schema: Value,
    pub required: bool,
}

impl ParamInfo {
    pub fn type_name(&self) -> Option<&str> {
        self.schema.get("type").and_then(|v| v.as_str())
    }

    pub fn is_string(&self) -> bool {
        self.type_name() == Some("string")
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.type_name(), Some("number") | Some("integer"))
    }

    pub fn enum_values(&self) -> Option<&Vec<Value>> {
        self.schema.get("enum").and_then(|v| v.as_array())
    }
}

/// Flatten a tool's input schema into its top-level parameters.
pub fn tool_params(tool: &McpTool) -> Vec<ParamInfo> {
    let schema = tool.schema();
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    schema
        .get("properties")
        .and_then(|v| v.as_object())
        .map(|props| {
            props
                .iter()
                .map(|(name, schema)| ParamInfo {
                    name: name.clone(),
                    schema: schema.clone(),
                    required: required.contains(&name.as_str()),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Per-tool scenario builder. Holds the running ordinal so ids stay stable.
struct Builder<'a> {
    tool: &'a McpTool,
    params: Vec<ParamInfo>,
    oracle: &'a dyn ValueOracle,
    inferred: Priority,
    scenarios: Vec<Scenario>,
}

impl<'a> Builder<'a> {
    fn push(
        &mut self,
        category: Category,
        description: String,
        args: Value,
        expected: ExpectedOutcome,
        assertions: Vec<Assertion>,
        priority: Priority,
        tags: Vec<String>,
    ) {
        let ordinal = self
            .scenarios
            .iter()
            .filter(|s| s.category == category)
            .count();
        self.scenarios.push(Scenario {
            id: format!("{}::{}::{}", self.tool.name, category, ordinal),
            tool_name: self.tool.name.clone(),
            category,
            description,
            args,
            expected,
            assertions,
            priority,
            tags,
        });
    }

    /// Arguments covering every required parameter.
    fn required_args(&self) -> Map<String, Value> {
        let mut args = Map::new();
        for param in self.params.iter().filter(|p| p.required) {
            args.insert(
                param.name.clone(),
                self.oracle.example_for(&param.schema, &param.name),
            );
        }
        args
    }

    fn happy_path(&mut self) {
        let args = self.required_args();
        self.push(
            Category::HappyPath,
            format!("call {} with all required parameters", self.tool.name),
            Value::Object(args.clone()),
            ExpectedOutcome::Success,
            vec![Assertion::not_error()],
            Priority::Critical,
            vec![],
        );

        // High-confidence optionals: those with a default or an enum.
        let confident: Vec<&ParamInfo> = self
            .params
            .iter()
            .filter(|p| !p.required && (p.schema.get("default").is_some() || p.enum_values().is_some()))
            .collect();
        if !confident.is_empty() {
            let mut extended = args;
            for param in confident {
                extended.insert(
                    param.name.clone(),
                    self.oracle.example_for(&param.schema, &param.name),
                );
            }
            self.push(
                Category::HappyPath,
                format!("call {} with high-confidence optionals included", self.tool.name),
                Value::Object(extended),
                ExpectedOutcome::Success,
                vec![Assertion::not_error()],
                Priority::Critical,
                vec![],
            );
        }
    }

    fn boundary(&mut self) {
        let params = self.params.clone();
        for param in &params {
            if param.is_numeric() {
                let min = param.schema.get("minimum").and_then(|v| v.as_f64());
                let max = param.schema.get("maximum").and_then(|v| v.as_f64());
                if min.is_none() && max.is_none() {
                    continue;
                }
                let integer = param.type_name() == Some("integer");
                if let Some(min) = min {
                    self.boundary_numeric(param, min, integer, true, "minimum");
                    self.boundary_numeric(param, min - 1.0, integer, false, "below minimum");
                }
                if let Some(max) = max {
                    self.boundary_numeric(param, max, integer, true, "maximum");
                    self.boundary_numeric(param, max + 1.0, integer, false, "above maximum");
                }
                if let (Some(min), Some(max)) = (min, max)
                    && min < 0.0
                    && max > 0.0
                {
                    self.boundary_numeric(param, 0.0, integer, true, "zero inside range");
                }
            } else if param.is_string() {
                let min_len = param.schema.get("minLength").and_then(|v| v.as_u64());
                let max_len = param.schema.get("maxLength").and_then(|v| v.as_u64());
                if let Some(min_len) = min_len {
                    self.boundary_string(param, min_len as usize, true, "minLength");
                    if min_len > 0 {
                        self.boundary_string(param, min_len as usize - 1, false, "below minLength");
                    }
                }
                if let Some(max_len) = max_len {
                    self.boundary_string(param, max_len as usize, true, "maxLength");
                    self.boundary_string(param, max_len as usize + 1, false, "above maxLength");
                }
            }
        }
    }

    fn boundary_numeric(
        &mut self,
        param: &ParamInfo,
        value: f64,
        integer: bool,
        in_range: bool,
        label: &str,
    ) {
        let mut args = self.required_args();
        let value = if integer {
            json!(value as i64)
        } else {
            json!(value)
        };
        args.insert(param.name.clone(), value.clone());
        let (expected, assertions) = if in_range {
            (ExpectedOutcome::Success, vec![Assertion::not_error()])
        } else {
            (ExpectedOutcome::Error, vec![])
        };
        self.push(
            Category::Boundary,
            format!("{} at {} ({})", param.name, value, label),
            Value::Object(args),
            expected,
            assertions,
            self.inferred,
            vec![format!("param:{}", param.name)],
        );
    }

    fn boundary_string(&mut self, param: &ParamInfo, len: usize, in_range: bool, label: &str) {
        let mut args = self.required_args();
        args.insert(param.name.clone(), json!("x".repeat(len)));
        let (expected, assertions) = if in_range {
            (ExpectedOutcome::Success, vec![Assertion::not_error()])
        } else {
            (ExpectedOutcome::Error, vec![])
        };
        self.push(
            Category::Boundary,
            format!("{} with length {} ({})", param.name, len, label),
            Value::Object(args),
            expected,
            assertions,
            self.inferred,
            vec![format!("param:{}", param.name)],
        );
    }

    fn enums(&mut self) {
        let params = self.params.clone();
        for param in &params {
            let Some(values) = param.enum_values().cloned() else {
                continue;
            };
            for value in values {
                let mut args = self.required_args();
                args.insert(param.name.clone(), value.clone());
                self.push(
                    Category::Enum,
                    format!("{} = {}", param.name, value),
                    Value::Object(args),
                    ExpectedOutcome::Success,
                    vec![Assertion::not_error()],
                    self.inferred,
                    vec![format!("param:{}", param.name)],
                );
            }
        }
    }

    fn optional_combinations(&mut self, priority_score: u8) {
        let optionals: Vec<ParamInfo> = self
            .params
            .iter()
            .filter(|p| !p.required)
            .cloned()
            .collect();
        if optionals.is_empty() {
            return;
        }

        // Subset budget grows with tool priority.
        let budget = 1 + (priority_score as usize) / 25;

        let mut subsets: Vec<Vec<&ParamInfo>> = optionals.iter().map(|p| vec![p]).collect();
        if optionals.len() > 1 {
            subsets.push(optionals.iter().collect());
        }

        for subset in subsets.into_iter().take(budget) {
            let mut args = self.required_args();
            let names: Vec<String> = subset.iter().map(|p| p.name.clone()).collect();
            for param in subset {
                args.insert(
                    param.name.clone(),
                    self.oracle.example_for(&param.schema, &param.name),
                );
            }
            self.push(
                Category::OptionalCombinations,
                format!("optionals: {}", names.join(", ")),
                Value::Object(args),
                ExpectedOutcome::Success,
                vec![Assertion::not_error()],
                self.inferred,
                names.iter().map(|n| format!("param:{}", n)).collect(),
            );
        }
    }

    fn error_handling(&mut self) {
        let params = self.params.clone();

        // Omit each required parameter in turn.
        for param in params.iter().filter(|p| p.required) {
            let mut args = self.required_args();
            args.remove(&param.name);
            self.push(
                Category::ErrorHandling,
                format!("omit required parameter {}", param.name),
                Value::Object(args),
                ExpectedOutcome::Error,
                vec![],
                Priority::Critical,
                vec![format!("param:{}", param.name)],
            );
        }

        // Substitute an incompatible JSON type.
        for param in params.iter().take(MAX_TYPE_WRONG) {
            let Some(wrong) = type_wrong_value(&param.schema) else {
                continue;
            };
            let mut args = self.required_args();
            args.insert(param.name.clone(), wrong);
            self.push(
                Category::ErrorHandling,
                format!("type-incompatible value for {}", param.name),
                Value::Object(args),
                ExpectedOutcome::Error,
                vec![],
                self.inferred,
                vec![format!("param:{}", param.name)],
            );
        }
    }

    fn security(&mut self) {
        let targets: Vec<ParamInfo> = self
            .params
            .iter()
            .filter(|p| p.is_string() && p.enum_values().is_none())
            .take(MAX_SECURITY_PARAMS)
            .cloned()
            .collect();

        for param in &targets {
            for payload in PAYLOADS {
                let mut args = self.required_args();
                args.insert(param.name.clone(), json!(payload.payload));
                self.push(
                    Category::Security,
                    format!("{} payload in {}", payload.category, param.name),
                    Value::Object(args),
                    payload.expected,
                    vec![],
                    self.inferred,
                    vec![
                        format!("param:{}", param.name),
                        format!("security:{}", payload.category),
                    ],
                );
            }
        }
    }

    fn semantic(&mut self) {
        let params = self.params.clone();
        for param in &params {
            let haystack = format!(
                "{} {}",
                param.name,
                param.schema.get("description").and_then(|v| v.as_str()).unwrap_or("")
            );
            let Some(hint) = detect_hint(&haystack) else {
                continue;
            };
            // Keep the synthesized value type-compatible with the parameter.
            let value = semantic_example(hint);
            let value = if param.is_string() {
                match value {
                    Value::String(_) => value,
                    other => Value::String(other.to_string()),
                }
            } else if param.is_numeric() {
                match value {
                    Value::Number(_) => value,
                    _ => continue,
                }
            } else {
                continue;
            };
            let mut args = self.required_args();
            args.insert(param.name.clone(), value);
            self.push(
                Category::Semantic,
                format!("{} with a plausible {:?} value", param.name, hint),
                Value::Object(args),
                ExpectedOutcome::Success,
                vec![Assertion::not_error()],
                Priority::Low,
                vec![format!("param:{}", param.name)],
            );
        }
    }
}

/// A JSON value of a type incompatible with the declared one.
fn type_wrong_value(schema: &Value) -> Option<Value> {
    match schema.get("type").and_then(|v| v.as_str())? {
        "string" => Some(json!(12345)),
        "number" | "integer" => Some(json!("not-a-number")),
        "boolean" => Some(json!("yes")),
        "array" => Some(json!({"unexpected": "object"})),
        "object" => Some(json!(["unexpected", "array"])),
        _ => None,
    }
}

/// Scenario priority inferred from the tool's pruning score.
fn inferred_priority(priority_score: u8) -> Priority {
    if priority_score >= 70 {
        Priority::High
    } else if priority_score >= 40 {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// Build the catalog for one tool, restricted to the enabled categories.
/// Scenario ordering follows `Category::ALL`, so execution gives the server
/// a linear, predictable error context.
pub fn synthesize_catalog(
    tool: &McpTool,
    enabled: &[Category],
    priority_score: u8,
    oracle: &dyn ValueOracle,
) -> Catalog {
    let mut builder = Builder {
        tool,
        params: tool_params(tool),
        oracle,
        inferred: inferred_priority(priority_score),
        scenarios: Vec::new(),
    };

    for category in Category::ALL {
        if !enabled.contains(&category) {
            continue;
        }
        match category {
            Category::HappyPath => builder.happy_path(),
            Category::Boundary => builder.boundary(),
            Category::Enum => builder.enums(),
            Category::OptionalCombinations => builder.optional_combinations(priority_score),
            Category::ErrorHandling => builder.error_handling(),
            Category::Security => builder.security(),
            Category::Semantic => builder.semantic(),
        }
    }

    Catalog {
        scenarios: builder.scenarios,
    }
}
