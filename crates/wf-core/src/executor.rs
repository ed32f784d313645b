//! Executor core (§4.8): the wave loop, per-node dispatch, config
//! resolution, retry/fallback wrapping, control-flow interpretation,
//! checkpointing, and cancellation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wf_ast::execution::{ExecutionPlan, ExecutionState, ExecutionStatus, NodeResult, NodeStatus, Wave};
use wf_ast::node::NodeAst;

use crate::checkpoint;
use crate::config::{ExecuteOptions, RuntimeConfig};
use crate::control_flow::{self, ControlOutput};
use crate::error::ExecutionEngineError;
use crate::expression::{evaluate_template, redacted_context, EvaluationContext};
use crate::retry;
use crate::runtime::{RuntimeParams, RuntimeRegistry};
use crate::semaphore::ConcurrencyGate;

/// Shared, cheaply-cloneable state every node dispatch and control-flow
/// handler needs: the runtime registry, resolved config, and the plan
/// (for fallback/body/child node lookups).
#[derive(Clone)]
pub struct ExecutorCtx {
    pub registry: Arc<RuntimeRegistry>,
    pub config: RuntimeConfig,
    pub plan: Arc<ExecutionPlan>,
}

/// A failure callback invoked once, best-effort, after a run fails (§4.8.1
/// step 5). Errors it raises are logged, never allowed to mask the
/// original failure.
pub type ErrorHandler = Arc<dyn Fn(&ExecutionEngineError) + Send + Sync>;

/// Config keys that hold embedded node ASTs verbatim (a control
/// descriptor's branches/body/children). Their string fields are templates
/// meant to be resolved once that embedded node actually runs, in its own
/// per-branch/per-iteration context — not here, against the control node's
/// own context.
const EMBEDDED_NODE_KEYS: [&str; 3] = ["branches", "bodyNodes", "children"];

/// Resolve every string in `raw` as a template against `state`'s context,
/// recursing into nested maps and arrays; everything else passes through
/// unchanged (§4.8.3 step 4).
fn resolve_config(
    raw: &serde_json::Map<String, Value>,
    state: &ExecutionState,
) -> Result<serde_json::Map<String, Value>, ExecutionEngineError> {
    let env: HashMap<String, String> = std::env::vars().collect();
    let ctx = EvaluationContext::for_node(state, &env);
    let mut out = serde_json::Map::new();
    for (k, v) in raw {
        if EMBEDDED_NODE_KEYS.contains(&k.as_str()) {
            out.insert(k.clone(), v.clone());
        } else {
            out.insert(k.clone(), resolve_value(v, &ctx)?);
        }
    }
    Ok(out)
}

fn resolve_value(value: &Value, ctx: &EvaluationContext) -> Result<Value, ExecutionEngineError> {
    Ok(match value {
        Value::String(s) => evaluate_template(s, ctx)?,
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, ctx)?);
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for v in items {
                out.push(resolve_value(v, ctx)?);
            }
            Value::Array(out)
        }
        other => other.clone(),
    })
}

/// A single runtime invocation plus control-flow interpretation of its
/// output, with no retry/fallback wrapping — the unit retry repeats and
/// fallback runs exactly once (§4.7 step 3: "the fallback runs without its
/// own retry wrapper").
async fn invoke_once(
    ctx: &ExecutorCtx,
    node: &NodeAst,
    input: &Value,
    branch_state: &mut ExecutionState,
    cancel: &CancellationToken,
) -> Result<Value, ExecutionEngineError> {
    let runtime = ctx
        .registry
        .get(&node.node_type)
        .ok_or_else(|| ExecutionEngineError::UnknownRuntime(node.node_type.clone()))?;

    let resolved_config = resolve_config(&node.config, branch_state)?;

    let raw = runtime
        .execute(RuntimeParams {
            node,
            input,
            config: &resolved_config,
            state: &*branch_state,
            signal: cancel,
        })
        .await
        .map_err(|e| match e {
            ExecutionEngineError::NodeExecution { .. } | ExecutionEngineError::Break(_) => e,
            other => ExecutionEngineError::NodeExecution { node: node.id.clone(), message: other.to_string() },
        })?;

    match control_flow::classify(raw) {
        ControlOutput::Scalar(v) => Ok(v),
        ControlOutput::Parallel(p) => control_flow::parallel::handle(ctx, p, branch_state, cancel).await,
        ControlOutput::Foreach(f) => control_flow::foreach::handle(ctx, f, branch_state, cancel).await,
        ControlOutput::Loop(l) => control_flow::loop_handler::handle(ctx, &node.id, l, branch_state, cancel).await,
        ControlOutput::Timeout(t) => control_flow::timeout::handle(ctx, t, branch_state, cancel).await,
    }
}

const EPHEMERAL_CONTEXT_KEYS: [&str; 5] =
    ["input", "$branch", "$iteration", "$primaryError", "$primaryInput"];

/// Run a single node end to end (§4.8.3): resolve input, branch state,
/// resolve config, retry/fallback-wrap the runtime call, interpret
/// control-flow output, and publish any nested results the run produced
/// back into `state`.
pub async fn run_node(
    ctx: &ExecutorCtx,
    node: &NodeAst,
    state: &mut ExecutionState,
    cancel: &CancellationToken,
) -> Result<Value, ExecutionEngineError> {
    if cancel.is_cancelled() {
        return Err(ExecutionEngineError::Timeout(ctx.config.default_timeout_ms));
    }

    let input = node
        .input
        .as_ref()
        .and_then(|pred| state.node_output(pred))
        .cloned()
        .unwrap_or(Value::Null);

    let mut branch_state = state.branch();
    branch_state.node_context.insert("input".to_string(), input.clone());

    let retry_config = node
        .error_config
        .clone()
        .unwrap_or_else(|| ctx.config.default_retry.clone());

    let outcome = retry::run_with_retry(&retry_config, |_attempt| {
        invoke_once(ctx, node, &input, &mut branch_state, cancel)
    })
    .await;

    let result = match outcome {
        Ok(value) => Ok(value),
        Err(exhausted) if exhausted.last_error.is_break() => Err(exhausted.last_error),
        Err(exhausted) => match &retry_config.fallback_node_id {
            Some(fallback_id) => match ctx.plan.node(fallback_id).cloned() {
                Some(fallback_node) => {
                    branch_state.node_context.insert(
                        "$primaryError".into(),
                        retry::primary_error_binding(&exhausted.last_error.to_string()),
                    );
                    branch_state
                        .node_context
                        .insert("$primaryInput".into(), retry::primary_input_binding(&input));
                    tracing::warn!(
                        node_id = %node.id, fallback = %fallback_id,
                        "primary node exhausted retries, invoking fallback"
                    );
                    invoke_once(ctx, &fallback_node, &input, &mut branch_state, cancel).await
                }
                None => Err(exhausted.last_error),
            },
            None => Err(exhausted.last_error),
        },
    };

    state.node_results.extend(branch_state.node_results);
    for (k, v) in branch_state.node_context {
        if !EPHEMERAL_CONTEXT_KEYS.contains(&k.as_str()) {
            state.node_context.insert(k, v);
        }
    }

    result
}

/// Per-wave wrapper around [`run_node`] that records duration and turns a
/// thrown error into a failed [`NodeResult`] rather than propagating it —
/// the caller (`execute_wave`) decides whether the wave fails overall.
pub async fn execute_node(
    ctx: &ExecutorCtx,
    node: &NodeAst,
    state: &mut ExecutionState,
    cancel: &CancellationToken,
) -> NodeResult {
    let started_at = Utc::now();
    match run_node(ctx, node, state, cancel).await {
        Ok(value) => {
            let duration_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
            NodeResult::success(value, started_at, duration_ms)
        }
        Err(e) => {
            let duration_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
            tracing::warn!(node_id = %node.id, error = %e, "node execution failed");
            NodeResult::failed(e.to_string(), started_at, duration_ms)
        }
    }
}

/// Drive one wave: dispatch every node concurrently under the configured
/// semaphore, then fail fast if any node failed (§4.8.2).
pub async fn execute_wave(
    ctx: &ExecutorCtx,
    wave: &Wave,
    state: &mut ExecutionState,
    cancel: &CancellationToken,
) -> Result<(), ExecutionEngineError> {
    if cancel.is_cancelled() {
        return Err(ExecutionEngineError::Timeout(ctx.config.default_timeout_ms));
    }

    let gate = ConcurrencyGate::new(ctx.config.max_concurrency);
    let mut tasks = FuturesUnordered::new();

    for node_id in &wave.node_ids {
        let Some(node) = ctx.plan.node(node_id).cloned() else { continue };
        let mut node_state = state.branch();
        let gate = gate.clone();
        let cancel = cancel.clone();
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = gate.acquire().await;
            let result = execute_node(&ctx, &node, &mut node_state, &cancel).await;
            (node.id, result, node_state)
        }));
    }

    let mut failures: Vec<String> = Vec::new();
    let mut total = 0usize;

    while let Some(joined) = tasks.next().await {
        total += 1;
        let (node_id, result, node_state) =
            joined.map_err(|e| ExecutionEngineError::Internal(e.to_string()))?;

        state.node_results.extend(node_state.node_results);
        for (k, v) in node_state.node_context {
            if !EPHEMERAL_CONTEXT_KEYS.contains(&k.as_str()) {
                state.node_context.insert(k, v);
            }
        }

        if let Some(err) = &result.error {
            failures.push(format!("{node_id}: {err}"));
        }
        match result.status {
            NodeStatus::Success => state.record_success(&node_id, result),
            _ => state.record_failure(&node_id, result),
        }
    }

    if !failures.is_empty() {
        return Err(ExecutionEngineError::AggregateWaveFailure(
            failures.len(),
            total,
            failures.join("; "),
        ));
    }
    Ok(())
}

async fn run_waves(
    ctx: &ExecutorCtx,
    waves: &[Wave],
    state: &mut ExecutionState,
    cancel: &CancellationToken,
) -> Result<(), ExecutionEngineError> {
    for wave in waves {
        if cancel.is_cancelled() {
            return Err(ExecutionEngineError::Timeout(ctx.config.default_timeout_ms));
        }
        state.current_wave = wave.wave_number;
        tracing::debug!(wave = wave.wave_number, "entering wave");
        execute_wave(ctx, wave, state, cancel).await?;
        if let Some(path) = &ctx.config.persistence_path {
            if let Err(e) = checkpoint::save(path, state).await {
                tracing::warn!(error = %e, "failed to persist checkpoint after wave");
            }
        }
    }
    Ok(())
}

async fn append_audit_log(log_path: &Path, state: &ExecutionState, outcome: &Result<(), String>) {
    let line = serde_json::json!({
        "runId": state.run_id,
        "workflowId": state.workflow_id,
        "status": state.status,
        "error": outcome.as_ref().err(),
        "context": redacted_context(state),
        "recordedAt": Utc::now(),
    });
    let mut bytes = match serde_json::to_vec(&line) {
        Ok(b) => b,
        Err(_) => return,
    };
    bytes.push(b'\n');
    if let Err(e) = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await
    {
        tracing::warn!(error = %e, "failed to open audit log");
        return;
    }
    if let Err(e) = tokio::fs::write(log_path, bytes).await {
        tracing::warn!(error = %e, "failed to append audit log");
    }
}

/// Top-level `execute(plan, state, options)` (§4.8.1).
pub async fn execute(
    plan: Arc<ExecutionPlan>,
    mut state: ExecutionState,
    registry: Arc<RuntimeRegistry>,
    options: ExecuteOptions,
    defaults: &RuntimeConfig,
    error_handler: Option<ErrorHandler>,
) -> Result<ExecutionState, ExecutionEngineError> {
    let config = options.resolve(defaults);
    let ctx = ExecutorCtx { registry, config: config.clone(), plan: plan.clone() };

    let cancel = CancellationToken::new();
    if config.default_timeout_ms > 0 {
        let cancel_for_timer = cancel.clone();
        let timeout_ms = config.default_timeout_ms;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            cancel_for_timer.cancel();
        });
    }

    state.status = ExecutionStatus::Running;
    tracing::info!(workflow_id = %state.workflow_id, run_id = %state.run_id, "execution started");

    let run_result = run_waves(&ctx, &plan.waves, &mut state, &cancel).await;

    match &run_result {
        Ok(()) => {
            state.status = ExecutionStatus::Completed;
            state.completed_at = Some(Utc::now());
            tracing::info!(run_id = %state.run_id, "execution completed");
        }
        Err(e) => {
            state.status = ExecutionStatus::Failed;
            state.completed_at = Some(Utc::now());
            tracing::error!(
                run_id = %state.run_id, error = %e, context = %redacted_context(&state),
                "execution failed"
            );
        }
    }

    if let Some(path) = &config.persistence_path {
        if let Err(e) = checkpoint::save(path, &state).await {
            tracing::warn!(error = %e, "failed to persist final checkpoint");
        }
    }

    if let (Some(handler), Err(e)) = (&error_handler, &run_result) {
        // §4.8.1 step 5: a broken handler must never mask the original
        // failure, so a panic inside it is caught and logged, not propagated.
        let handler = handler.clone();
        let e = e.clone();
        if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || handler(&e))) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(run_id = %state.run_id, panic = %message, "error handler panicked");
        }
    }

    if let Some(log_path) = &config.log_path {
        let outcome = run_result.as_ref().map(|_| ()).map_err(|e| e.to_string());
        append_audit_log(log_path, &state, &outcome).await;
    }

    cancel.cancel();
    run_result.map(|()| state)
}

/// §4.14 Resume: load a checkpoint, trim the plan to unfinished waves, and
/// run the normal executor over what remains.
pub async fn resume(
    plan: Arc<ExecutionPlan>,
    checkpoint_path: &Path,
    secrets: HashMap<String, String>,
    registry: Arc<RuntimeRegistry>,
    options: ExecuteOptions,
    defaults: &RuntimeConfig,
) -> Result<ExecutionState, ExecutionEngineError> {
    let mut state = checkpoint::load(checkpoint_path, secrets)
        .await
        .map_err(|e| ExecutionEngineError::Checkpoint(e.to_string()))?;
    state.status = ExecutionStatus::Running;

    let trimmed = checkpoint::trim_waves_for_resume(&plan.waves, &state);
    let config = options.resolve(defaults);
    let ctx = ExecutorCtx { registry, config: config.clone(), plan: plan.clone() };
    let cancel = CancellationToken::new();

    let run_result = run_waves(&ctx, &trimmed, &mut state, &cancel).await;
    match &run_result {
        Ok(()) => {
            state.status = ExecutionStatus::Completed;
            state.completed_at = Some(Utc::now());
        }
        Err(_) => {
            state.status = ExecutionStatus::Failed;
            state.completed_at = Some(Utc::now());
        }
    }
    if let Some(path) = &config.persistence_path {
        let _ = checkpoint::save(path, &state).await;
    }
    run_result.map(|()| state)
}

pub async fn can_resume(checkpoint_path: &Path) -> bool {
    checkpoint::can_resume(checkpoint_path).await
}
