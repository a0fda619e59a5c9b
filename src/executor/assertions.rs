// src/executor/assertions.rs
// Assertion evaluation over unwrapped response payloads

use serde_json::Value;

use crate::scenario::{Assertion, Condition};
use crate::utils::json::select;

/// Result of evaluating one assertion.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AssertionOutcome {
    pub passed: bool,
    pub condition: String,
    pub path: String,
    pub message: String,
}

impl AssertionOutcome {
    fn pass(assertion: &Assertion, message: impl Into<String>) -> Self {
        Self {
            passed: true,
            condition: condition_name(assertion.condition).to_string(),
            path: assertion.path.clone(),
            message: message.into(),
        }
    }

    fn fail(assertion: &Assertion, message: impl Into<String>) -> Self {
        let message = assertion
            .message
            .clone()
            .unwrap_or_else(|| message.into());
        Self {
            passed: false,
            condition: condition_name(assertion.condition).to_string(),
            path: assertion.path.clone(),
            message,
        }
    }
}

fn condition_name(condition: Condition) -> &'static str {
    match condition {
        Condition::Exists => "exists",
        Condition::Equals => "equals",
        Condition::Contains => "contains",
        Condition::Truthy => "truthy",
        Condition::Type => "type",
        Condition::NotError => "not_error",
    }
}

/// Evaluate one assertion against an unwrapped payload.
pub fn evaluate(assertion: &Assertion, payload: &Value) -> AssertionOutcome {
    let selected = select(payload, &assertion.path);

    match assertion.condition {
        Condition::Exists => match selected {
            Some(_) => AssertionOutcome::pass(assertion, format!("'{}' exists", assertion.path)),
            None => AssertionOutcome::fail(assertion, format!("'{}' not found", assertion.path)),
        },

        Condition::Equals => {
            let Some(expected) = &assertion.value else {
                return AssertionOutcome::fail(assertion, "equals assertion without a value");
            };
            match selected {
                Some(actual) if actual == expected => {
                    AssertionOutcome::pass(assertion, format!("'{}' equals expected", assertion.path))
                }
                Some(actual) => AssertionOutcome::fail(
                    assertion,
                    format!("'{}' is {} but expected {}", assertion.path, actual, expected),
                ),
                None => AssertionOutcome::fail(assertion, format!("'{}' not found", assertion.path)),
            }
        }

        Condition::Contains => {
            let Some(expected) = &assertion.value else {
                return AssertionOutcome::fail(assertion, "contains assertion without a value");
            };
            match selected {
                Some(Value::String(haystack)) => {
                    let needle = match expected {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    if haystack.contains(&needle) {
                        AssertionOutcome::pass(assertion, format!("'{}' contains value", assertion.path))
                    } else {
                        AssertionOutcome::fail(
                            assertion,
                            format!("'{}' does not contain {}", assertion.path, needle),
                        )
                    }
                }
                Some(Value::Array(items)) => {
                    if items.contains(expected) {
                        AssertionOutcome::pass(assertion, format!("'{}' contains value", assertion.path))
                    } else {
                        AssertionOutcome::fail(
                            assertion,
                            format!("'{}' does not contain {}", assertion.path, expected),
                        )
                    }
                }
                Some(other) => AssertionOutcome::fail(
                    assertion,
                    format!("'{}' is {} (not a string or array)", assertion.path, other),
                ),
                None => AssertionOutcome::fail(assertion, format!("'{}' not found", assertion.path)),
            }
        }

        Condition::Truthy => match selected {
            Some(value) if is_truthy(value) => {
                AssertionOutcome::pass(assertion, format!("'{}' is truthy", assertion.path))
            }
            Some(value) => AssertionOutcome::fail(
                assertion,
                format!("'{}' is {} which is not truthy", assertion.path, value),
            ),
            None => AssertionOutcome::fail(assertion, format!("'{}' not found", assertion.path)),
        },

        Condition::Type => {
            let Some(expected) = assertion.value.as_ref().and_then(|v| v.as_str()) else {
                return AssertionOutcome::fail(assertion, "type assertion without a type name");
            };
            match selected {
                Some(value) if json_type(value) == expected => {
                    AssertionOutcome::pass(assertion, format!("'{}' is {}", assertion.path, expected))
                }
                Some(value) => AssertionOutcome::fail(
                    assertion,
                    format!(
                        "'{}' is {} but expected {}",
                        assertion.path,
                        json_type(value),
                        expected
                    ),
                ),
                None => AssertionOutcome::fail(assertion, format!("'{}' not found", assertion.path)),
            }
        }

        Condition::NotError => {
            let errored = payload
                .get("isError")
                .or_else(|| payload.get("error"))
                .is_some_and(is_truthy);
            if errored {
                let message = payload
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("tool returned an error");
                AssertionOutcome::fail(assertion, message.to_string())
            } else {
                AssertionOutcome::pass(assertion, "no error")
            }
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
