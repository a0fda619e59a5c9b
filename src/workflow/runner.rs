// src/workflow/runner.rs
// Ordered workflow execution with arg mapping and state snapshots

use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{STEP_REF, Workflow, WorkflowStep};
use crate::baseline::WorkflowSignature;
use crate::config::SnapshotConfig;
use crate::error::{BellwetherError, Result};
use crate::executor::assertions::{AssertionOutcome, evaluate};
use crate::executor::unwrap::{UnwrappedResponse, unwrap_tool_result};
use crate::protocol::McpTool;
use crate::session::Session;
use crate::state::{
    DependencyEdge, DependencyTracker, Snapshot, StateChange, classify, diff_snapshots,
    take_snapshot,
};
use crate::utils::json::select;

/// Outcome of a single workflow step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub index: usize,
    pub tool: String,
    pub passed: bool,
    pub optional: bool,
    pub error: Option<String>,
    pub assertion_outcomes: Vec<AssertionOutcome>,
    /// Unwrapped payload, used by later steps' arg mapping.
    pub payload: Value,
    pub duration_ms: u64,
}

/// Everything a workflow run produced.
#[derive(Debug)]
pub struct WorkflowRunResult {
    pub signature: WorkflowSignature,
    pub steps: Vec<StepOutcome>,
    pub snapshots: Vec<Snapshot>,
    pub changes: Vec<StateChange>,
    pub edges: Vec<DependencyEdge>,
}

/// Execute a workflow against a live session.
///
/// Snapshot policy: before step 0, after each writer step, and after the
/// final step. Snapshots are skipped entirely when the server exposes no
/// probe tools.
pub async fn run_workflow(
    session: &Session,
    workflow: &Workflow,
    tools: &[McpTool],
    probes: &[McpTool],
    snapshot_config: &SnapshotConfig,
    request_timeout: Duration,
) -> WorkflowRunResult {
    let tool_index: HashMap<&str, &McpTool> = tools.iter().map(|t| (t.name.as_str(), t)).collect();

    let mut steps: Vec<StepOutcome> = Vec::new();
    let mut snapshots: Vec<Snapshot> = Vec::new();
    let mut changes: Vec<StateChange> = Vec::new();
    let mut tracker = DependencyTracker::new();
    let mut consumed_outputs: Vec<String> = Vec::new();

    if !probes.is_empty() {
        snapshots.push(take_snapshot(session, probes, snapshot_config, None).await);
    }

    let last_index = workflow.steps.len().saturating_sub(1);
    for (index, step) in workflow.steps.iter().enumerate() {
        let outcome = run_step(
            session,
            step,
            index,
            &steps,
            &mut consumed_outputs,
            request_timeout,
        )
        .await;

        let classification = tool_index
            .get(step.tool.as_str())
            .map(|tool| classify(tool));
        if let Some(classification) = &classification {
            tracker.record_step(index, classification);
        }

        let is_writer = classification
            .as_ref()
            .map(|c| {
                matches!(
                    c.role,
                    crate::state::ToolRole::Writer | crate::state::ToolRole::Both
                )
            })
            .unwrap_or(false);

        let should_snapshot = !probes.is_empty() && (is_writer || index == last_index);
        if should_snapshot {
            let snapshot = take_snapshot(session, probes, snapshot_config, Some(index)).await;
            if let Some(previous) = snapshots.last() {
                changes.extend(diff_snapshots(previous, &snapshot, Some(index)));
            }
            snapshots.push(snapshot);
        }

        let failed_required = !outcome.passed && !outcome.optional;
        steps.push(outcome);
        if failed_required {
            warn!(workflow = %workflow.id, step = index, "required step failed; aborting workflow");
            break;
        }
    }

    tracker.verify(&changes);

    let succeeded = steps.len() == workflow.steps.len()
        && steps.iter().all(|s| s.passed || s.optional);

    consumed_outputs.sort();
    consumed_outputs.dedup();

    info!(workflow = %workflow.id, succeeded, steps = steps.len(), "workflow finished");

    WorkflowRunResult {
        signature: WorkflowSignature {
            name: workflow.name.clone(),
            tool_sequence: workflow.tool_sequence(),
            succeeded,
            key_outputs: consumed_outputs,
        },
        steps,
        snapshots,
        changes,
        edges: tracker.into_edges(),
    }
}

async fn run_step(
    session: &Session,
    step: &WorkflowStep,
    index: usize,
    prior: &[StepOutcome],
    consumed_outputs: &mut Vec<String>,
    timeout: Duration,
) -> StepOutcome {
    let started = Instant::now();

    let args = match resolve_args(step, prior, consumed_outputs) {
        Ok(args) => args,
        Err(e) => {
            return StepOutcome {
                index,
                tool: step.tool.clone(),
                passed: false,
                optional: step.optional,
                error: Some(e.to_string()),
                assertion_outcomes: Vec::new(),
                payload: Value::Null,
                duration_ms: started.elapsed().as_millis() as u64,
            };
        }
    };

    debug!(step = index, tool = %step.tool, "running workflow step");
    let call = session
        .call(
            "tools/call",
            Some(json!({"name": step.tool, "arguments": args})),
            timeout,
        )
        .await;

    let (payload, error) = match call {
        Ok(result) => match unwrap_tool_result(&result) {
            UnwrappedResponse::Ok(payload) => (payload, None),
            err @ UnwrappedResponse::Err { .. } => {
                let message = match &err {
                    UnwrappedResponse::Err { message } => message.clone(),
                    UnwrappedResponse::Ok(_) => unreachable!(),
                };
                (err.payload(), Some(message))
            }
        },
        Err(e) => (Value::Null, Some(e.to_string())),
    };

    let assertion_outcomes: Vec<AssertionOutcome> = step
        .assertions
        .iter()
        .map(|a| evaluate(a, &payload))
        .collect();

    let passed = error.is_none() && assertion_outcomes.iter().all(|o| o.passed);

    StepOutcome {
        index,
        tool: step.tool.clone(),
        passed,
        optional: step.optional,
        error,
        assertion_outcomes,
        payload,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Resolve a step's arguments: literal `args` as the base, `argMapping`
/// entries layered on top (mapping wins on key conflict). A reference whose
/// target is missing fails with `unresolved_reference`.
fn resolve_args(
    step: &WorkflowStep,
    prior: &[StepOutcome],
    consumed_outputs: &mut Vec<String>,
) -> Result<Value> {
    let mut args: Map<String, Value> = match &step.args {
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            return Err(BellwetherError::ConfigInvalid(format!(
                "step args must be an object, got {}",
                other
            )));
        }
        None => Map::new(),
    };

    for (key, reference) in &step.arg_mapping {
        let captures = STEP_REF.captures(reference).ok_or_else(|| {
            BellwetherError::UnresolvedReference(format!("malformed reference: {}", reference))
        })?;
        let step_index: usize = captures[1]
            .parse()
            .map_err(|_| BellwetherError::UnresolvedReference(reference.clone()))?;
        let path = &captures[2];

        let source = prior.get(step_index).ok_or_else(|| {
            BellwetherError::UnresolvedReference(format!(
                "{} points at a step that has not run",
                reference
            ))
        })?;
        let value = select(&source.payload, path).ok_or_else(|| {
            BellwetherError::UnresolvedReference(format!(
                "{} not found in step {} output",
                reference, step_index
            ))
        })?;

        consumed_outputs.push(format!("steps[{}].{}", step_index, path));
        args.insert(key.clone(), value.clone());
    }

    Ok(Value::Object(args))
}
