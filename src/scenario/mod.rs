// src/scenario/mod.rs
// Scenario and assertion type definitions

pub mod security;
pub mod synthesizer;

pub use synthesizer::{ParamInfo, synthesize_catalog, tool_params};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Closed set of test categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    HappyPath,
    Boundary,
    Enum,
    OptionalCombinations,
    ErrorHandling,
    Security,
    Semantic,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::HappyPath,
        Category::Boundary,
        Category::Enum,
        Category::OptionalCombinations,
        Category::ErrorHandling,
        Category::Security,
        Category::Semantic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::HappyPath => "happy_path",
            Category::Boundary => "boundary",
            Category::Enum => "enum",
            Category::OptionalCombinations => "optional_combinations",
            Category::ErrorHandling => "error_handling",
            Category::Security => "security",
            Category::Semantic => "semantic",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scenario priority, assigned deterministically at synthesis time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

/// What the scenario expects from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedOutcome {
    /// A non-error response satisfying the assertions.
    Success,
    /// A tool-level error (the point of error_handling scenarios).
    Error,
    /// The server should refuse the input outright.
    Reject,
    /// The server may accept but must neutralize the payload.
    Sanitize,
}

/// Conditions an assertion can check. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Exists,
    Equals,
    Contains,
    Truthy,
    Type,
    NotError,
}

/// A single check against the unwrapped response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    /// Dotted/bracketed selector over the unwrapped payload.
    #[serde(default)]
    pub path: String,
    pub condition: Condition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Assertion {
    pub fn not_error() -> Self {
        Self {
            path: String::new(),
            condition: Condition::NotError,
            value: None,
            message: None,
        }
    }

    pub fn exists(path: &str) -> Self {
        Self {
            path: path.to_string(),
            condition: Condition::Exists,
            value: None,
            message: None,
        }
    }
}

/// A single deterministic test case against a tool.
///
/// Invariant: `args` validates against the tool's input schema for every
/// category except `error_handling`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Stable id: `{tool}::{category}::{ordinal}`.
    pub id: String,
    pub tool_name: String,
    pub category: Category,
    pub description: String,
    pub args: Value,
    pub expected: ExpectedOutcome,
    pub assertions: Vec<Assertion>,
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// The full per-tool catalog for one run, in execution order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub scenarios: Vec<Scenario>,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn by_category(&self, category: Category) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter().filter(move |s| s.category == category)
    }
}
