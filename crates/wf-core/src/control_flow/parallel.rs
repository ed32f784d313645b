//! `control:parallel` (§4.9): fan out independent branches, apply a wait
//! strategy to decide overall success, then merge surviving outputs.

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wf_ast::execution::ExecutionState;

use super::{merge_branch, run_sequence, ParallelResult};
use crate::error::ExecutionEngineError;
use crate::executor::ExecutorCtx;
use crate::expression::{evaluate, EvaluationContext};
use crate::semaphore::ConcurrencyGate;

/// How many successful branches `wait` requires, given `branch_count`
/// branches total.
fn required_successes(wait: Option<&str>, branch_count: usize) -> usize {
    match wait {
        Some("any") => 1,
        Some(spec) if spec.starts_with("n(") && spec.ends_with(')') => spec[2..spec.len() - 1]
            .parse::<usize>()
            .unwrap_or(branch_count)
            .min(branch_count),
        _ => branch_count,
    }
}

fn merge_values(merge: Option<&str>, state: &mut ExecutionState, values: Vec<Value>) -> Value {
    match merge {
        None | Some("array") => Value::Array(values),
        Some("concat") => {
            let mut out = Vec::new();
            for v in values {
                match v {
                    Value::Array(items) => out.extend(items),
                    other => out.push(other),
                }
            }
            Value::Array(out)
        }
        Some("object") => {
            let mut map = serde_json::Map::new();
            for (i, v) in values.into_iter().enumerate() {
                map.insert(i.to_string(), v);
            }
            Value::Object(map)
        }
        Some(expr) => {
            state.node_context.insert("$branches".into(), Value::Array(values.clone()));
            let ctx = EvaluationContext::for_node(state, &Default::default());
            evaluate(expr, &ctx).unwrap_or(Value::Array(values))
        }
    }
}

pub async fn handle(
    ctx: &ExecutorCtx,
    p: ParallelResult,
    state: &mut ExecutionState,
    cancel: &CancellationToken,
) -> Result<Value, ExecutionEngineError> {
    let limit = p.max_concurrency.unwrap_or(ctx.config.max_concurrency).max(1);
    let gate = ConcurrencyGate::new(limit);
    let mut tasks = FuturesUnordered::new();

    for (index, branch_nodes) in p.branches.iter().cloned().enumerate() {
        let mut branch_state = state.branch();
        branch_state.node_context.insert("$branch".into(), Value::from(index));
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        let gate = gate.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = gate.acquire().await;
            let result = run_sequence(&ctx, &branch_nodes, &mut branch_state, &cancel).await;
            (index, result, branch_state)
        }));
    }

    let required = required_successes(p.wait.as_deref(), p.branch_count);
    // `wait=all` (the default) reports outputs in branch declaration order;
    // `any`/`n(k)` report the first `required` successes in completion
    // order and stop waiting on stragglers once that threshold is hit.
    let wants_declaration_order = matches!(p.wait.as_deref(), None | Some("all"));

    let mut by_index: Vec<Option<Value>> = vec![None; p.branches.len()];
    let mut completion_order: Vec<Value> = Vec::new();
    let mut succeeded = 0usize;
    let mut last_error = None;

    while wants_declaration_order || succeeded < required {
        let Some(joined) = tasks.next().await else {
            break;
        };
        let (index, result, branch_state) =
            joined.map_err(|e| ExecutionEngineError::Internal(e.to_string()))?;
        merge_branch(state, branch_state, &["$branch"]);
        match result {
            Ok(v) => {
                by_index[index] = Some(v.clone());
                completion_order.push(v);
                succeeded += 1;
            }
            Err(e) => last_error = Some(e),
        }
    }

    if succeeded < required {
        return Err(last_error.unwrap_or_else(|| ExecutionEngineError::NodeExecution {
            node: "control:parallel".into(),
            message: format!("only {succeeded} of {required} required branches succeeded"),
        }));
    }

    let values: Vec<Value> = if wants_declaration_order {
        by_index.into_iter().flatten().collect()
    } else {
        completion_order.into_iter().take(required).collect()
    };
    Ok(merge_values(p.merge.as_deref(), state, values))
}
