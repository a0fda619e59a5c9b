// src/executor/invoke.rs
// One scenario: resolve, call, unwrap, assert, record

use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::assertions::{AssertionOutcome, evaluate};
use super::unwrap::{UnwrappedResponse, unwrap_tool_result};
use crate::error::{BellwetherError, Result};
use crate::scenario::security::PAYLOADS;
use crate::scenario::{Category, ExpectedOutcome, Scenario};
use crate::session::Session;

/// Full record of one executed scenario.
#[derive(Debug, Clone)]
pub struct ScenarioRecord {
    pub scenario_id: String,
    pub tool_name: String,
    pub category: Category,
    pub args: Value,
    pub raw_response: Option<Value>,
    /// Unwrapped payload the assertions ran against.
    pub payload: Value,
    pub passed: bool,
    pub assertion_outcomes: Vec<AssertionOutcome>,
    /// Call-level fault, when one occurred.
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
    /// Security observation worth fingerprinting, if any.
    pub security_note: Option<String>,
    /// Behavioral limitation observed, if any.
    pub limitation: Option<String>,
    pub duration_ms: u64,
    /// Warmup records prime caches and error history but stay out of the
    /// fingerprint unless explicitly included.
    pub warmup: bool,
}

/// Execute one scenario against the session.
///
/// Call-level faults (timeout, tool error, protocol error) are captured in
/// the record. Only run-fatal faults (transport closed, initialize failures)
/// propagate as `Err`.
pub async fn run_scenario(
    session: &Session,
    scenario: &Scenario,
    timeout: Duration,
) -> Result<ScenarioRecord> {
    let started = Instant::now();
    debug!(scenario = %scenario.id, "running scenario");

    let call = session
        .call(
            "tools/call",
            Some(json!({
                "name": scenario.tool_name,
                "arguments": scenario.args,
            })),
            timeout,
        )
        .await;

    let mut record = ScenarioRecord {
        scenario_id: scenario.id.clone(),
        tool_name: scenario.tool_name.clone(),
        category: scenario.category,
        args: scenario.args.clone(),
        raw_response: None,
        payload: Value::Null,
        passed: false,
        assertion_outcomes: Vec::new(),
        error: None,
        error_kind: None,
        security_note: None,
        limitation: None,
        duration_ms: 0,
        warmup: false,
    };

    match call {
        Ok(raw) => {
            let unwrapped = unwrap_tool_result(&raw);
            record.raw_response = Some(raw);
            record.payload = unwrapped.payload();
            record.assertion_outcomes = scenario
                .assertions
                .iter()
                .map(|a| evaluate(a, &record.payload))
                .collect();
            judge(scenario, &unwrapped, &mut record);
        }
        Err(e) if e.is_fatal() => return Err(e),
        Err(BellwetherError::Protocol { code, message }) => {
            // The server answered with a JSON-RPC error: a tool-level
            // rejection, which error-expecting scenarios count as a pass.
            record.payload = json!({
                "error": true,
                "isError": true,
                "message": message,
                "code": code,
            });
            record.error = Some(message.clone());
            record.error_kind = Some("tool_error");
            record.assertion_outcomes = scenario
                .assertions
                .iter()
                .map(|a| evaluate(a, &record.payload))
                .collect();
            record.passed = expects_error(scenario.expected)
                || record.assertion_outcomes.iter().any(|o| o.passed);
        }
        Err(e) => {
            record.error = Some(e.to_string());
            record.error_kind = Some(e.kind());
            record.passed = false;
        }
    }

    record.duration_ms = started.elapsed().as_millis() as u64;
    Ok(record)
}

fn expects_error(expected: ExpectedOutcome) -> bool {
    matches!(expected, ExpectedOutcome::Error | ExpectedOutcome::Reject)
}

/// Apply the aggregate pass rule and derive security/limitation notes.
fn judge(scenario: &Scenario, unwrapped: &UnwrappedResponse, record: &mut ScenarioRecord) {
    let tool_errored = unwrapped.is_error();
    if tool_errored {
        record.error = Some(
            record
                .payload
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("tool reported an error")
                .to_string(),
        );
        record.error_kind = Some("tool_error");
    }

    match scenario.expected {
        ExpectedOutcome::Success => {
            record.passed = !tool_errored && record.assertion_outcomes.iter().all(|o| o.passed);
        }
        ExpectedOutcome::Error | ExpectedOutcome::Reject => {
            record.passed =
                tool_errored || record.assertion_outcomes.iter().any(|o| o.passed);
            if !tool_errored {
                match scenario.category {
                    Category::Security => {
                        record.security_note = Some(format!(
                            "accepts {} without rejecting",
                            describe_security(scenario)
                        ));
                    }
                    Category::Boundary => {
                        record.limitation = Some(format!(
                            "accepts out-of-range input: {}",
                            scenario.description
                        ));
                    }
                    _ => {}
                }
            }
        }
        ExpectedOutcome::Sanitize => {
            if tool_errored {
                record.passed = true;
            } else if let Some(payload_text) = injected_payload(&scenario.args) {
                let echoed = response_contains(&record.payload, payload_text);
                record.passed = !echoed;
                if echoed {
                    record.security_note = Some(format!(
                        "echoes {} payload unsanitized",
                        describe_security(scenario)
                    ));
                }
            } else {
                record.passed = true;
            }
        }
    }
}

fn describe_security(scenario: &Scenario) -> String {
    scenario
        .tags
        .iter()
        .find_map(|t| t.strip_prefix("security:"))
        .map(String::from)
        .unwrap_or_else(|| "security".to_string())
}

/// Find the payload-table string injected into this scenario's args.
fn injected_payload(args: &Value) -> Option<&'static str> {
    let object = args.as_object()?;
    object.values().find_map(|value| {
        let text = value.as_str()?;
        PAYLOADS
            .iter()
            .find(|p| p.payload == text)
            .map(|p| p.payload)
    })
}

fn response_contains(payload: &Value, needle: &str) -> bool {
    match payload {
        Value::String(s) => s.contains(needle),
        Value::Array(items) => items.iter().any(|v| response_contains(v, needle)),
        Value::Object(map) => map.values().any(|v| response_contains(v, needle)),
        _ => false,
    }
}
