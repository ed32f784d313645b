//! `control:foreach` (§4.10): iterate a collection through a shared set of
//! body nodes (referenced by id from the surrounding plan), sequentially by
//! default or concurrently under a bounded gate when `maxConcurrency > 1`.

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wf_ast::execution::ExecutionState;

use super::{merge_branch, run_sequence, ForeachResult};
use crate::error::ExecutionEngineError;
use crate::executor::ExecutorCtx;
use crate::semaphore::ConcurrencyGate;

fn resolve_body(ctx: &ExecutorCtx, f: &ForeachResult) -> Vec<wf_ast::node::NodeAst> {
    f.body_node_ids
        .iter()
        .filter_map(|id| ctx.plan.node(id).cloned())
        .collect()
}

async fn run_sequential(
    ctx: &ExecutorCtx,
    f: &ForeachResult,
    body: &[wf_ast::node::NodeAst],
    state: &mut ExecutionState,
    cancel: &CancellationToken,
) -> Result<Value, ExecutionEngineError> {
    let mut results = Vec::with_capacity(f.collection.len());
    for (index, item) in f.collection.iter().enumerate() {
        let mut iter_state = state.branch();
        iter_state.node_context.insert(f.item_var.clone(), item.clone());
        iter_state.node_context.insert(f.index_var.clone(), Value::from(index));

        let outcome = run_sequence(ctx, body, &mut iter_state, cancel).await;
        merge_branch(state, iter_state, &[f.item_var.as_str(), f.index_var.as_str()]);

        match outcome {
            Ok(v) => results.push(v),
            Err(e) if e.is_break() => {
                results.push(Value::Null);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(Value::Array(results))
}

async fn run_concurrent(
    ctx: &ExecutorCtx,
    f: &ForeachResult,
    body: &[wf_ast::node::NodeAst],
    state: &mut ExecutionState,
    cancel: &CancellationToken,
    limit: usize,
) -> Result<Value, ExecutionEngineError> {
    let gate = ConcurrencyGate::new(limit);
    let mut tasks = FuturesUnordered::new();

    for (index, item) in f.collection.iter().cloned().enumerate() {
        let mut iter_state = state.branch();
        iter_state.node_context.insert(f.item_var.clone(), item);
        iter_state.node_context.insert(f.index_var.clone(), Value::from(index));
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        let gate = gate.clone();
        let body = body.to_vec();
        tasks.push(tokio::spawn(async move {
            let _permit = gate.acquire().await;
            let result = run_sequence(&ctx, &body, &mut iter_state, &cancel).await;
            (index, result, iter_state)
        }));
    }

    let mut ordered: Vec<Value> = vec![Value::Null; f.collection.len()];
    let mut first_error = None;

    while let Some(joined) = tasks.next().await {
        let (index, result, iter_state) =
            joined.map_err(|e| ExecutionEngineError::Internal(e.to_string()))?;
        merge_branch(state, iter_state, &[f.item_var.as_str(), f.index_var.as_str()]);
        match result {
            Ok(v) => ordered[index] = v,
            Err(e) if e.is_break() => {} // that iteration alone is aborted; others are unaffected
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    Ok(Value::Array(ordered))
}

pub async fn handle(
    ctx: &ExecutorCtx,
    f: ForeachResult,
    state: &mut ExecutionState,
    cancel: &CancellationToken,
) -> Result<Value, ExecutionEngineError> {
    let body = resolve_body(ctx, &f);
    match f.max_concurrency {
        Some(limit) if limit > 1 => run_concurrent(ctx, &f, &body, state, cancel, limit).await,
        _ => run_sequential(ctx, &f, &body, state, cancel).await,
    }
}
