//! Execution state, per-node results, and the execution plan produced by
//! the wave planner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::node::NodeAst;

/// Overall run status (§3 Execution state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Per-node result status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeStatus {
    Success,
    Failed,
    Skipped,
}

/// The recorded outcome of running a single node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl NodeResult {
    pub fn success(output: Value, started_at: DateTime<Utc>, duration_ms: u64) -> Self {
        Self {
            status: NodeStatus::Success,
            output: Some(output),
            error: None,
            duration_ms,
            started_at,
            completed_at: Some(started_at + chrono::Duration::milliseconds(duration_ms as i64)),
        }
    }

    pub fn failed(error: impl Into<String>, started_at: DateTime<Utc>, duration_ms: u64) -> Self {
        Self {
            status: NodeStatus::Failed,
            output: None,
            error: Some(error.into()),
            duration_ms,
            started_at,
            completed_at: Some(started_at + chrono::Duration::milliseconds(duration_ms as i64)),
        }
    }

    pub fn skipped(started_at: DateTime<Utc>) -> Self {
        Self {
            status: NodeStatus::Skipped,
            output: None,
            error: None,
            duration_ms: 0,
            started_at,
            completed_at: Some(started_at),
        }
    }
}

/// A single layered-context table: name to arbitrary JSON value.
pub type ContextTable = HashMap<String, Value>;

/// The mutable state threaded through an entire run.
///
/// `node_results` and the three context tables are the only shared mutable
/// state during execution (§5); everything else is read-only after the run
/// starts. `secrets` is deliberately excluded from `Serialize`/`Deserialize`
/// at this layer's default derive by living behind `#[serde(skip)]` —
/// persisted-state (checkpoint) encoding is handled explicitly by
/// `wf_core::checkpoint`, which never touches this field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub workflow_id: String,
    pub run_id: String,
    pub status: ExecutionStatus,
    pub current_wave: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub node_results: HashMap<String, NodeResult>,
    pub global_context: ContextTable,
    pub phase_context: ContextTable,
    pub node_context: ContextTable,
    pub config: ContextTable,
    #[serde(skip)]
    pub secrets: HashMap<String, String>,
}

impl ExecutionState {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: uuid::Uuid::new_v4().to_string(),
            status: ExecutionStatus::Pending,
            current_wave: 0,
            started_at: Utc::now(),
            completed_at: None,
            node_results: HashMap::new(),
            global_context: HashMap::new(),
            phase_context: HashMap::new(),
            node_context: HashMap::new(),
            config: HashMap::new(),
            secrets: HashMap::new(),
        }
    }

    /// A shallow clone suitable for handing to an isolated child execution
    /// (parallel branch, foreach iteration). Context tables are copied by
    /// value; `node_results` is shared conceptually but each child writes
    /// only keys it owns, so a clone-then-merge-back discipline is safe.
    pub fn branch(&self) -> Self {
        self.clone()
    }

    /// Record a successful result and publish its output into the node
    /// context under `nodeId.output` (as the flattened top-level binding
    /// `nodeId -> {output}` described in §4.3).
    pub fn record_success(&mut self, node_id: &str, result: NodeResult) {
        if let Some(output) = &result.output {
            self.node_context.insert(
                node_id.to_string(),
                serde_json::json!({ "output": output }),
            );
        }
        self.node_results.insert(node_id.to_string(), result);
    }

    pub fn record_failure(&mut self, node_id: &str, result: NodeResult) {
        self.node_results.insert(node_id.to_string(), result);
    }

    pub fn node_output(&self, node_id: &str) -> Option<&Value> {
        self.node_results
            .get(node_id)
            .and_then(|r| r.output.as_ref())
    }
}

/// One topological level: all nodes ready to run once every earlier wave
/// has completed. Node order within a wave carries no meaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wave {
    pub wave_number: u32,
    pub node_ids: Vec<String>,
}

/// The output of the wave planner: waves in execution order plus a node
/// lookup table for the executor.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub workflow_id: String,
    pub total_nodes: usize,
    pub waves: Vec<Wave>,
    pub nodes: HashMap<String, NodeAst>,
}

impl ExecutionPlan {
    pub fn node(&self, id: &str) -> Option<&NodeAst> {
        self.nodes.get(id)
    }
}
