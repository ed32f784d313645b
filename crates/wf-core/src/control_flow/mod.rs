//! Control-flow descriptors and their handlers (§4.8.4-§4.12).
//!
//! Runtimes return a plain `serde_json::Value`. The executor attempts a
//! structural parse into [`ControlOutput`] — trying each descriptor shape
//! in turn via `serde`, falling back to `Scalar` — rather than branching on
//! the originating node's type string (§9's design note, implemented
//! exactly as recommended).

pub mod foreach;
pub mod loop_handler;
pub mod parallel;
pub mod timeout;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wf_ast::execution::ExecutionState;
use wf_ast::node::NodeAst;

use crate::error::ExecutionEngineError;
use crate::executor::{run_node, ExecutorCtx};

/// Run an inline body (loop/timeout children, a parallel branch) as a
/// sequential chain: each node's `.input` may reference an earlier body
/// node's id or the enclosing control node's own `input` binding, both of
/// which are already present in `state` by the time this runs. Returns the
/// last node's output, or propagates the first error (including a
/// [`BreakSignal`] wrapped in [`ExecutionEngineError::Break`]).
pub(crate) async fn run_sequence(
    ctx: &ExecutorCtx,
    nodes: &[NodeAst],
    state: &mut ExecutionState,
    cancel: &CancellationToken,
) -> Result<Value, ExecutionEngineError> {
    let mut last = Value::Null;
    for node in nodes {
        match run_node(ctx, node, state, cancel).await {
            Ok(value) => {
                let started = chrono::Utc::now();
                state.record_success(&node.id, wf_ast::execution::NodeResult::success(value.clone(), started, 0));
                last = value;
            }
            Err(e) => {
                let started = chrono::Utc::now();
                state.record_failure(&node.id, wf_ast::execution::NodeResult::failed(e.to_string(), started, 0));
                return Err(e);
            }
        }
    }
    Ok(last)
}

/// Merge a completed branch/iteration's state back into the parent,
/// excluding the ephemeral bindings the handler seeded it with.
pub(crate) fn merge_branch(state: &mut ExecutionState, branch: ExecutionState, skip_keys: &[&str]) {
    state.node_results.extend(branch.node_results);
    for (k, v) in branch.node_context {
        if !skip_keys.contains(&k.as_str()) {
            state.node_context.insert(k, v);
        }
    }
}

/// `{branches, branchCount, maxConcurrency?, wait?, merge?}` (§4.8.4, §4.9).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelResult {
    pub branches: Vec<Vec<NodeAst>>,
    pub branch_count: usize,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub wait: Option<String>,
    #[serde(default)]
    pub merge: Option<String>,
}

/// `{collection, itemVar, indexVar, maxConcurrency?, bodyNodeIds}` (§4.10).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeachResult {
    pub collection: Vec<Value>,
    pub item_var: String,
    pub index_var: String,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    pub body_node_ids: Vec<String>,
}

/// `{maxIterations, bodyNodes, breakCondition?}` (§4.11).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopResult {
    pub max_iterations: u32,
    pub body_nodes: Vec<NodeAst>,
    #[serde(default)]
    pub break_condition: Option<String>,
}

/// `{durationMs, children, onTimeout?}` (§4.12).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutResult {
    pub duration_ms: u64,
    pub children: Vec<NodeAst>,
    #[serde(default)]
    pub on_timeout: Option<String>,
}

/// Structural classification of a runtime's raw output (§9's `ControlOutput`
/// design note). Variant order matters: `serde(untagged)` tries each in
/// turn, and `Scalar` must stay last since it accepts any JSON value.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ControlOutput {
    Parallel(ParallelResult),
    Foreach(ForeachResult),
    Loop(LoopResult),
    Timeout(TimeoutResult),
    Scalar(Value),
}

/// Parse a raw runtime output into its structural shape.
pub fn classify(output: Value) -> ControlOutput {
    serde_json::from_value(output.clone()).unwrap_or(ControlOutput::Scalar(output))
}

/// A break-out-of-loop/foreach control signal (§4.11, §9).
///
/// Not a real error: threaded through `Result::Err` per the design note's
/// decision, never `panic!`. `target_loop_id` names the enclosing
/// loop/foreach node the break is meant for; `None` targets the innermost
/// enclosing handler.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakSignal {
    pub target_loop_id: Option<String>,
    pub message: Option<String>,
}

impl BreakSignal {
    pub fn innermost() -> Self {
        Self { target_loop_id: None, message: None }
    }

    pub fn targeting(loop_id: impl Into<String>) -> Self {
        Self { target_loop_id: Some(loop_id.into()), message: None }
    }

    /// True if this signal should be consumed by a handler whose own node
    /// id is `handler_id` — either it targets nobody in particular (the
    /// innermost handler takes it) or it names this handler by id.
    pub fn targets(&self, handler_id: &str) -> bool {
        match &self.target_loop_id {
            None => true,
            Some(id) => id == handler_id,
        }
    }
}
