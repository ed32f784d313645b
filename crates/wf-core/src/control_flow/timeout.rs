//! `control:timeout` (§4.12): race a sequential child chain against a
//! duration, falling back to a named plan node (run under the parent's own
//! token) on expiry.

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wf_ast::execution::ExecutionState;

use super::{merge_branch, run_sequence, TimeoutResult};
use crate::error::ExecutionEngineError;
use crate::executor::{run_node, ExecutorCtx};

pub async fn handle(
    ctx: &ExecutorCtx,
    t: TimeoutResult,
    state: &mut ExecutionState,
    cancel: &CancellationToken,
) -> Result<Value, ExecutionEngineError> {
    let local = cancel.child_token();
    let mut child_state = state.branch();

    let raced = tokio::select! {
        result = run_sequence(ctx, &t.children, &mut child_state, &local) => Some(result),
        _ = tokio::time::sleep(Duration::from_millis(t.duration_ms)) => {
            local.cancel();
            None
        }
    };

    match raced {
        Some(outcome) => {
            merge_branch(state, child_state, &[]);
            outcome
        }
        None => match &t.on_timeout {
            Some(fallback_id) => match ctx.plan.node(fallback_id).cloned() {
                Some(fallback_node) => run_node(ctx, &fallback_node, state, cancel).await,
                None => Err(ExecutionEngineError::Timeout(t.duration_ms)),
            },
            None => Err(ExecutionEngineError::Timeout(t.duration_ms)),
        },
    }
}
