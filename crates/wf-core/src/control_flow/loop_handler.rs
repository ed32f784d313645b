//! `control:loop` (§4.11): run a fixed body sequentially up to
//! `maxIterations`, checking an optional break condition after each
//! iteration, honoring a [`super::BreakSignal`] raised from inside the body.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wf_ast::execution::ExecutionState;

use super::{merge_branch, run_sequence, LoopResult};
use crate::error::ExecutionEngineError;
use crate::executor::ExecutorCtx;
use crate::expression::evaluator::is_truthy;
use crate::expression::{evaluate, EvaluationContext};

pub async fn handle(
    ctx: &ExecutorCtx,
    loop_node_id: &str,
    l: LoopResult,
    state: &mut ExecutionState,
    cancel: &CancellationToken,
) -> Result<Value, ExecutionEngineError> {
    let mut last = Value::Null;

    for iteration in 0..l.max_iterations {
        if cancel.is_cancelled() {
            return Err(ExecutionEngineError::Cancelled);
        }

        let mut iter_state = state.branch();
        iter_state.node_context.insert("$iteration".into(), Value::from(iteration));

        let outcome = run_sequence(ctx, &l.body_nodes, &mut iter_state, cancel).await;
        merge_branch(state, iter_state, &["$iteration"]);

        match outcome {
            Ok(v) => last = v,
            Err(ExecutionEngineError::Break(signal)) if signal.targets(loop_node_id) => break,
            Err(e) => return Err(e),
        }

        if let Some(condition) = &l.break_condition {
            let mut probe = state.branch();
            probe.node_context.insert("$iteration".into(), Value::from(iteration));
            let eval_ctx = EvaluationContext::for_node(&probe, &Default::default());
            // An unevaluatable break condition never stops the loop — only a
            // condition that evaluates and comes back truthy does.
            if let Ok(value) = evaluate(condition, &eval_ctx) {
                if is_truthy(&value) {
                    break;
                }
            }
        }
    }

    Ok(last)
}
