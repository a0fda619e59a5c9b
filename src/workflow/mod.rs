// src/workflow/mod.rs
// Workflow definitions: YAML loading and validation

pub mod runner;

pub use runner::{StepOutcome, WorkflowRunResult, run_workflow};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use regex::Regex;
use tracing::info;

use crate::error::{BellwetherError, Result};
use crate::scenario::Assertion;

/// Shape every argMapping selector must take.
pub static STEP_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$steps\[(\d+)\]\.result\.([A-Za-z0-9_.\[\]]+)$")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

/// One step of an ordered workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Tool to call.
    pub tool: String,

    /// Human-readable step description.
    #[serde(default)]
    pub description: String,

    /// Literal arguments, used as-is.
    #[serde(default)]
    pub args: Option<Value>,

    /// Mappings evaluated against earlier step results using the
    /// `$steps[i].result.<path>` selector. Wins over `args` on key conflict.
    #[serde(default, rename = "argMapping")]
    pub arg_mapping: HashMap<String, String>,

    /// An optional step may fail (or fail to resolve its references)
    /// without failing the workflow.
    #[serde(default)]
    pub optional: bool,

    /// Assertions over the step's unwrapped response.
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

/// A complete workflow document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "expectedOutcome")]
    pub expected_outcome: Option<String>,
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    /// Structural validation: non-empty steps, well-formed argMapping
    /// selectors, and references that only point at earlier steps.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(BellwetherError::ConfigInvalid(
                "workflow id cannot be empty".into(),
            ));
        }
        if self.steps.is_empty() {
            return Err(BellwetherError::ConfigInvalid(format!(
                "workflow '{}' has no steps",
                self.id
            )));
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.tool.is_empty() {
                return Err(BellwetherError::ConfigInvalid(format!(
                    "workflow '{}' step {} has no tool",
                    self.id, index
                )));
            }
            for (key, reference) in &step.arg_mapping {
                let Some(captures) = STEP_REF.captures(reference) else {
                    return Err(BellwetherError::ConfigInvalid(format!(
                        "workflow '{}' step {} argMapping '{}' is not a valid step reference: {}",
                        self.id, index, key, reference
                    )));
                };
                let target: usize = captures[1]
                    .parse()
                    .map_err(|_| BellwetherError::ConfigInvalid("step index overflow".into()))?;
                if target >= index {
                    return Err(BellwetherError::ConfigInvalid(format!(
                        "workflow '{}' step {} references step {} which has not run yet",
                        self.id, index, target
                    )));
                }
            }
        }
        Ok(())
    }

    /// Ordered tool names, for the workflow signature.
    pub fn tool_sequence(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.tool.clone()).collect()
    }
}

/// Load workflows from a YAML file. Supports single and multi-document
/// files; every document must validate.
pub fn load_workflows(path: &Path) -> Result<Vec<Workflow>> {
    let content = std::fs::read_to_string(path)?;
    let workflows = parse_workflows(&content)?;
    info!(path = %path.display(), count = workflows.len(), "loaded workflows");
    Ok(workflows)
}

/// Parse one or more YAML documents into validated workflows.
pub fn parse_workflows(content: &str) -> Result<Vec<Workflow>> {
    let mut workflows = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let workflow = Workflow::deserialize(document)
            .map_err(|e| BellwetherError::ConfigInvalid(format!("bad workflow document: {}", e)))?;
        workflow.validate()?;
        workflows.push(workflow);
    }
    if workflows.is_empty() {
        return Err(BellwetherError::ConfigInvalid(
            "workflow file contains no documents".into(),
        ));
    }
    Ok(workflows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATE_THEN_GET: &str = r#"
id: user-roundtrip
name: Create then fetch a user
steps:
  - tool: create_user
    args: {name: "x"}
  - tool: get_user
    argMapping:
      id: "$steps[0].result.id"
"#;

    #[test]
    fn test_parse_single_document() {
        let workflows = parse_workflows(CREATE_THEN_GET).unwrap();
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].id, "user-roundtrip");
        assert_eq!(workflows[0].tool_sequence(), vec!["create_user", "get_user"]);
    }

    #[test]
    fn test_parse_multi_document() {
        let content = format!("{}---\nid: second\nname: Second\nsteps:\n  - tool: ping\n", CREATE_THEN_GET);
        let workflows = parse_workflows(&content).unwrap();
        assert_eq!(workflows.len(), 2);
        assert_eq!(workflows[1].id, "second");
    }

    #[test]
    fn test_reject_malformed_reference() {
        let bad = r#"
id: bad
name: Bad
steps:
  - tool: create_user
  - tool: get_user
    argMapping:
      id: "steps[0].result.id"
"#;
        assert!(matches!(
            parse_workflows(bad),
            Err(BellwetherError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_reject_forward_reference() {
        let bad = r#"
id: forward
name: Forward
steps:
  - tool: get_user
    argMapping:
      id: "$steps[1].result.id"
  - tool: create_user
"#;
        assert!(parse_workflows(bad).is_err());
    }

    #[test]
    fn test_reject_empty_steps() {
        assert!(parse_workflows("id: empty\nname: Empty\nsteps: []\n").is_err());
    }

    #[test]
    fn test_step_ref_regex_accepts_bracket_paths() {
        assert!(STEP_REF.is_match("$steps[0].result.items[2].id"));
        assert!(STEP_REF.is_match("$steps[12].result.deep.nested_path"));
        assert!(!STEP_REF.is_match("$steps[0].output.id"));
        assert!(!STEP_REF.is_match("$steps[x].result.id"));
    }
}
