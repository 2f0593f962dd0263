//! Outcome of one convergence run

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use serde_json::Value as Json;

use crate::error::NodeError;
use crate::node::{Fields, NodeId};

/// Lifecycle state of a node within one run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum NodeState {
    /// Waiting for dependencies
    Declared,
    /// Every dependency is applied; waiting for a free slot
    Queued,
    /// Provider call in progress
    Applying,
    /// Provider call succeeded; outputs published
    Applied,
    /// Resolution or provider call failed
    Failed,
    /// Not attempted because a dependency failed
    Skipped,
}

impl NodeState {
    /// Whether the node can no longer change state in this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Declared => "declared",
            Self::Queued => "queued",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Per-node record of a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    /// Final state
    pub state: NodeState,
    /// Provider calls made (retries included)
    pub attempts: u32,
    /// Logical time the node entered `Applying`
    pub started_at: Option<u64>,
    /// Logical time the node reached `Applied` or `Failed`
    pub finished_at: Option<u64>,
    /// For skipped nodes, the failed node that blocked them
    pub blocked_by: Option<NodeId>,
}

impl NodeReport {
    pub(crate) fn declared() -> Self {
        Self {
            state: NodeState::Declared,
            attempts: 0,
            started_at: None,
            finished_at: None,
            blocked_by: None,
        }
    }
}

/// A node that failed, with the reason
#[derive(Clone, Debug)]
pub struct NodeFailure {
    /// The failed node
    pub node: NodeId,
    /// Why it failed
    pub error: NodeError,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.node, self.error)
    }
}

/// Everything a run produced: exports, node states, outputs and failures
#[derive(Clone, Debug, Default)]
pub struct RunResult {
    /// Resolved exports
    pub outputs: BTreeMap<String, Json>,
    /// Exports that could not be resolved because a source node did not apply
    pub missing_outputs: BTreeSet<String>,
    /// Final report of every node
    pub nodes: BTreeMap<NodeId, NodeReport>,
    /// Outputs published by applied nodes
    pub node_outputs: BTreeMap<NodeId, Fields>,
    /// Every failure, ordered by node
    pub failures: Vec<NodeFailure>,
}

impl RunResult {
    /// Whether every node applied
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
            && self
                .nodes
                .values()
                .all(|report| report.state == NodeState::Applied)
    }

    /// Final state of a node
    pub fn state(&self, node: &NodeId) -> Option<NodeState> {
        self.nodes.get(node).map(|report| report.state)
    }

    /// Nodes in the given state
    pub fn in_state(&self, state: NodeState) -> Vec<&NodeId> {
        self.nodes
            .iter()
            .filter(|(_, report)| report.state == state)
            .map(|(id, _)| id)
            .collect()
    }

    /// Applied nodes
    pub fn applied(&self) -> Vec<&NodeId> {
        self.in_state(NodeState::Applied)
    }

    /// Failed nodes
    pub fn failed(&self) -> Vec<&NodeId> {
        self.in_state(NodeState::Failed)
    }

    /// Skipped nodes
    pub fn skipped(&self) -> Vec<&NodeId> {
        self.in_state(NodeState::Skipped)
    }

    /// Counts per terminal state
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.nodes.len(),
            applied: self.applied().len(),
            failed: self.failed().len(),
            skipped: self.skipped().len(),
        }
    }
}

/// Counts of a run's terminal states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Nodes in the graph
    pub total: usize,
    /// Applied nodes
    pub applied: usize,
    /// Failed nodes
    pub failed: usize,
    /// Skipped nodes
    pub skipped: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes: {} applied, {} failed, {} skipped",
            self.total, self.applied, self.failed, self.skipped
        )
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())?;
        for failure in &self.failures {
            write!(f, "\n  failed {failure}")?;
        }
        for (id, report) in &self.nodes {
            if let (NodeState::Skipped, Some(blocker)) = (report.state, &report.blocked_by) {
                write!(f, "\n  skipped {id} (blocked by {blocker})")?;
            }
        }
        Ok(())
    }
}
