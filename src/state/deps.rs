// src/state/deps.rs
// Producer → consumer dependency inference over workflow step sequences

use serde::Serialize;
use std::collections::HashMap;

use super::snapshot::StateChange;
use super::{Classification, StateType, ToolRole};

/// One inferred dataflow edge. Never user input.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyEdge {
    pub producer_step: usize,
    pub consumer_step: usize,
    pub state_type: StateType,
    /// True once the producer step is known to have caused at least one
    /// observable state change.
    pub verified: bool,
}

/// Walks step classifications in execution order and maintains, per state
/// type, the most recent writer. Each reader of a type records an edge from
/// that writer.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    recent_writers: HashMap<StateType, usize>,
    edges: Vec<DependencyEdge>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the classification of the step at `index`.
    pub fn record_step(&mut self, index: usize, classification: &Classification) {
        let reads = matches!(classification.role, ToolRole::Reader | ToolRole::Both);
        let writes = matches!(classification.role, ToolRole::Writer | ToolRole::Both);

        if reads {
            for state_type in &classification.state_types {
                if let Some(&producer) = self.recent_writers.get(state_type)
                    && producer != index
                {
                    self.edges.push(DependencyEdge {
                        producer_step: producer,
                        consumer_step: index,
                        state_type: *state_type,
                        verified: false,
                    });
                }
            }
        }

        if writes {
            for state_type in &classification.state_types {
                self.recent_writers.insert(*state_type, index);
            }
        }
    }

    /// Mark edges verified: an edge is verified iff its producer step caused
    /// at least one snapshot change.
    pub fn verify(&mut self, changes: &[StateChange]) {
        for edge in &mut self.edges {
            edge.verified = changes
                .iter()
                .any(|change| change.step_index == Some(edge.producer_step));
        }
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn into_edges(self) -> Vec<DependencyEdge> {
        self.edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::snapshot::ChangeKind;

    fn classification(role: ToolRole, state_types: Vec<StateType>) -> Classification {
        Classification {
            role,
            confidence: 0.8,
            state_types,
        }
    }

    #[test]
    fn test_reader_links_to_most_recent_writer() {
        let mut tracker = DependencyTracker::new();
        tracker.record_step(0, &classification(ToolRole::Writer, vec![StateType::Users]));
        tracker.record_step(1, &classification(ToolRole::Writer, vec![StateType::Users]));
        tracker.record_step(2, &classification(ToolRole::Reader, vec![StateType::Users]));

        let edges = tracker.edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].producer_step, 1);
        assert_eq!(edges[0].consumer_step, 2);
        assert_eq!(edges[0].state_type, StateType::Users);
    }

    #[test]
    fn test_no_edge_without_prior_writer() {
        let mut tracker = DependencyTracker::new();
        tracker.record_step(0, &classification(ToolRole::Reader, vec![StateType::Files]));
        assert!(tracker.edges().is_empty());
    }

    #[test]
    fn test_edge_only_for_matching_state_type() {
        let mut tracker = DependencyTracker::new();
        tracker.record_step(0, &classification(ToolRole::Writer, vec![StateType::Files]));
        tracker.record_step(1, &classification(ToolRole::Reader, vec![StateType::Users]));
        assert!(tracker.edges().is_empty());
    }

    #[test]
    fn test_both_role_reads_then_writes() {
        let mut tracker = DependencyTracker::new();
        tracker.record_step(0, &classification(ToolRole::Writer, vec![StateType::Cache]));
        tracker.record_step(1, &classification(ToolRole::Both, vec![StateType::Cache]));
        // The Both step consumes the earlier write and becomes the new writer.
        assert_eq!(tracker.edges().len(), 1);
        tracker.record_step(2, &classification(ToolRole::Reader, vec![StateType::Cache]));
        assert_eq!(tracker.edges()[1].producer_step, 1);
    }

    #[test]
    fn test_verification_requires_producer_change() {
        let mut tracker = DependencyTracker::new();
        tracker.record_step(0, &classification(ToolRole::Writer, vec![StateType::Users]));
        tracker.record_step(1, &classification(ToolRole::Reader, vec![StateType::Users]));

        tracker.verify(&[StateChange {
            kind: ChangeKind::Created,
            key: "list_users.latest".into(),
            step_index: Some(0),
        }]);
        assert!(tracker.edges()[0].verified);

        // Soundness: verified implies a change attributed to the producer.
        tracker.verify(&[StateChange {
            kind: ChangeKind::Created,
            key: "list_users.latest".into(),
            step_index: Some(5),
        }]);
        assert!(!tracker.edges()[0].verified);
    }
}
