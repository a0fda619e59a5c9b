// src/state/snapshot.rs
// Probe snapshots of observable server state, snapshot hashing and diffing

use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SnapshotConfig;
use crate::executor::unwrap::{UnwrappedResponse, unwrap_tool_result};
use crate::protocol::McpTool;
use crate::session::Session;
use crate::utils::json::flatten;

/// A point-in-time view of server state taken through probe tools.
/// Ephemeral per workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub timestamp: String,
    /// Index of the workflow step this snapshot follows; None for the
    /// pre-run snapshot.
    pub after_step_index: Option<usize>,
    pub probe_tools: Vec<String>,
    /// Sorted probe name → parsed response. Probe failures are recorded as
    /// error objects rather than omitted, so the hash reflects observed
    /// state, not probe availability.
    pub data: BTreeMap<String, Value>,
    pub hash: String,
}

/// Kind of state change between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// One observed difference, attributed to the step between the snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub kind: ChangeKind,
    /// `probe.flattened.path` key.
    pub key: String,
    pub step_index: Option<usize>,
}

/// Call every probe with empty arguments under an individual timeout, the
/// whole operation bounded by the total deadline. A circuit breaker stops
/// probing once at least half the probes have failed consecutively.
pub async fn take_snapshot(
    session: &Session,
    probes: &[McpTool],
    config: &SnapshotConfig,
    after_step_index: Option<usize>,
) -> Snapshot {
    let started = Instant::now();
    let total_deadline = Duration::from_millis(config.total_timeout_ms);
    let probe_timeout = Duration::from_millis(config.probe_timeout_ms);
    let breaker_threshold = probes.len().div_ceil(2).max(1);

    let mut data = BTreeMap::new();
    let mut consecutive_failures = 0usize;
    let mut tripped = false;

    for probe in probes {
        if tripped || started.elapsed() >= total_deadline {
            data.insert(
                probe.name.clone(),
                json!({
                    "error": "probe_failed",
                    "message": if tripped { "circuit breaker open" } else { "snapshot deadline exceeded" },
                }),
            );
            continue;
        }

        let remaining = total_deadline.saturating_sub(started.elapsed());
        let budget = probe_timeout.min(remaining);
        let call = session.call(
            "tools/call",
            Some(json!({"name": probe.name, "arguments": {}})),
            budget,
        );

        match call.await {
            Ok(result) => match unwrap_tool_result(&result) {
                UnwrappedResponse::Ok(payload) => {
                    consecutive_failures = 0;
                    data.insert(probe.name.clone(), payload);
                }
                UnwrappedResponse::Err { message } => {
                    consecutive_failures += 1;
                    data.insert(
                        probe.name.clone(),
                        json!({"error": "probe_failed", "message": message}),
                    );
                }
            },
            Err(e) => {
                consecutive_failures += 1;
                let kind = match e {
                    crate::error::BellwetherError::Timeout { .. } => "probe_timeout",
                    _ => "probe_failed",
                };
                warn!(probe = %probe.name, "probe call failed: {}", e);
                data.insert(
                    probe.name.clone(),
                    json!({"error": kind, "message": e.to_string()}),
                );
            }
        }

        if consecutive_failures >= breaker_threshold {
            debug!(
                failures = consecutive_failures,
                "snapshot circuit breaker tripped"
            );
            tripped = true;
        }
    }

    let hash = hash_data(&data);
    Snapshot {
        timestamp: crate::utils::now_rfc3339(),
        after_step_index,
        probe_tools: probes.iter().map(|p| p.name.clone()).collect(),
        data,
        hash,
    }
}

/// Content hash over the sorted probe → response map.
fn hash_data(data: &BTreeMap<String, Value>) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in data {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.to_string().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Diff two snapshots at flattened-leaf granularity. Every change is
/// attributed to `step_index`, the step executed between the snapshots.
pub fn diff_snapshots(
    before: &Snapshot,
    after: &Snapshot,
    step_index: Option<usize>,
) -> Vec<StateChange> {
    let mut changes = Vec::new();

    let before_leaves = leaf_map(&before.data);
    let after_leaves = leaf_map(&after.data);

    for (key, value) in &after_leaves {
        match before_leaves.get(key) {
            None => changes.push(StateChange {
                kind: ChangeKind::Created,
                key: key.clone(),
                step_index,
            }),
            Some(previous) if previous != value => changes.push(StateChange {
                kind: ChangeKind::Modified,
                key: key.clone(),
                step_index,
            }),
            Some(_) => {}
        }
    }
    for key in before_leaves.keys() {
        if !after_leaves.contains_key(key) {
            changes.push(StateChange {
                kind: ChangeKind::Deleted,
                key: key.clone(),
                step_index,
            });
        }
    }

    changes
}

fn leaf_map(data: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut leaves = BTreeMap::new();
    for (probe, payload) in data {
        for (path, value) in flatten(payload) {
            let key = if path.is_empty() {
                probe.clone()
            } else {
                format!("{}.{}", probe, path)
            };
            leaves.insert(key, value);
        }
    }
    leaves
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with(data: Vec<(&str, Value)>) -> Snapshot {
        let data: BTreeMap<String, Value> =
            data.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let hash = hash_data(&data);
        Snapshot {
            timestamp: "2024-01-01T00:00:00Z".into(),
            after_step_index: None,
            probe_tools: data.keys().cloned().collect(),
            data,
            hash,
        }
    }

    #[test]
    fn test_hash_deterministic_for_same_data() {
        let a = snapshot_with(vec![("list_users", json!([{"id": 1}]))]);
        let b = snapshot_with(vec![("list_users", json!([{"id": 1}]))]);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_hash_changes_with_data() {
        let a = snapshot_with(vec![("list_users", json!([{"id": 1}]))]);
        let b = snapshot_with(vec![("list_users", json!([{"id": 1}, {"id": 2}]))]);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_failure_entries_affect_hash() {
        let ok = snapshot_with(vec![("list_users", json!([]))]);
        let failed = snapshot_with(vec![(
            "list_users",
            json!({"error": "probe_timeout", "message": "request 'tools/call' timed out"}),
        )]);
        assert_ne!(ok.hash, failed.hash);
    }

    #[test]
    fn test_diff_created() {
        let before = snapshot_with(vec![("list_users", json!({"count": 1}))]);
        let after = snapshot_with(vec![("list_users", json!({"count": 1, "latest": "u2"}))]);
        let changes = diff_snapshots(&before, &after, Some(3));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Created);
        assert_eq!(changes[0].key, "list_users.latest");
        assert_eq!(changes[0].step_index, Some(3));
    }

    #[test]
    fn test_diff_modified_and_deleted() {
        let before = snapshot_with(vec![("list_users", json!({"count": 1, "old": true}))]);
        let after = snapshot_with(vec![("list_users", json!({"count": 2}))]);
        let changes = diff_snapshots(&before, &after, Some(0));
        assert!(
            changes
                .iter()
                .any(|c| c.kind == ChangeKind::Modified && c.key == "list_users.count")
        );
        assert!(
            changes
                .iter()
                .any(|c| c.kind == ChangeKind::Deleted && c.key == "list_users.old")
        );
    }

    #[test]
    fn test_diff_empty_for_identical() {
        let a = snapshot_with(vec![("list_users", json!({"count": 1}))]);
        let b = snapshot_with(vec![("list_users", json!({"count": 1}))]);
        assert!(diff_snapshots(&a, &b, None).is_empty());
    }
}
