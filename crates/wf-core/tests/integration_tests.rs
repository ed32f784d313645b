//! End-to-end executor scenarios: a chain, a fan-out/fan-in DAG, parallel
//! wait=any, foreach with a mid-iteration break, retry exhaustion into a
//! fallback node, the expression sandbox's security gate, and checkpoint
//! resume. Each exercises the public `wf_core` surface the way a caller
//! assembling a plan and registry themselves would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use wf_ast::execution::{ExecutionPlan, ExecutionState, ExecutionStatus, NodeResult, Wave};
use wf_ast::graph::build_plan;
use wf_ast::node::{BackoffKind, ErrorConfig, NodeAst};
use wf_ast::workflow::{Metadata, WorkflowAst, WorkflowBuilder};

use wf_core::checkpoint;
use wf_core::control_flow::BreakSignal;
use wf_core::error::ExecutionEngineError;
use wf_core::runtime::{NodeRuntime, RuntimeParams, RuntimeRegistry};
use wf_core::{evaluate, execute, resume, EvaluationContext, ExecuteOptions, RuntimeConfig};

fn template_node(id: &str, template: &str) -> NodeAst {
    let mut node = NodeAst::new(id, "transform:template");
    node.set_config("template", Value::String(template.to_string()));
    node
}

fn workflow(name: &str) -> WorkflowAst {
    WorkflowAst::new(Metadata { name: name.into(), version: "1.0.0".into(), ..Default::default() })
}

// Scenario 1: a two-node chain, the second templating off the first's output.
#[tokio::test]
async fn chain_feeds_output_from_one_node_into_the_next() {
    let mut wf = workflow("chain");
    wf.add_node(template_node("a", "First"));
    wf.add_node(template_node("b", "Got: {{input}}").with_input("a"));

    let plan = Arc::new(build_plan(&wf).unwrap());
    let result = execute(
        plan,
        ExecutionState::new("chain"),
        Arc::new(RuntimeRegistry::with_builtins()),
        ExecuteOptions::default(),
        &RuntimeConfig::default(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.node_output("a"), Some(&Value::String("First".into())));
    assert_eq!(result.node_output("b"), Some(&Value::String("Got: First".into())));
}

// Scenario 2: fan-out from `a` into `b`/`c`, fan-in at `d`, under a
// concurrency cap tighter than the widest wave.
#[tokio::test]
async fn fan_out_and_fan_in_produce_three_waves_and_merge_both_branches() {
    let mut wf = workflow("fan");
    wf.add_node(template_node("a", "seed"));
    wf.add_node(template_node("b", "b:{{input}}").with_input("a"));
    wf.add_node(template_node("c", "c:{{input}}").with_input("a"));
    wf.add_node(template_node("d", "{{b.output}}+{{c.output}}"));

    let plan = Arc::new(build_plan(&wf).unwrap());
    assert_eq!(plan.waves.len(), 3);
    assert_eq!(plan.waves[0].node_ids, vec!["a".to_string()]);
    let mut wave1: Vec<String> = plan.waves[1].node_ids.clone();
    wave1.sort();
    assert_eq!(wave1, vec!["b".to_string(), "c".to_string()]);
    assert_eq!(plan.waves[2].node_ids, vec!["d".to_string()]);

    let options = ExecuteOptions { max_concurrency: Some(2), ..Default::default() };
    let result = execute(
        plan,
        ExecutionState::new("fan"),
        Arc::new(RuntimeRegistry::with_builtins()),
        options,
        &RuntimeConfig::default(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.node_output("d"), Some(&Value::String("b:seed+c:seed".into())));
}

// Scenario 3: `control:parallel` with `wait: "any"` merges only the first
// branch to complete, as a one-element array, without blocking on the rest.
#[tokio::test]
async fn parallel_wait_any_returns_a_single_winner() {
    let branches: Vec<Vec<NodeAst>> = (0..3)
        .map(|i| vec![template_node(&format!("branch{i}"), &format!("winner-{i}"))])
        .collect();

    let mut config = Map::new();
    config.insert("branches".into(), serde_json::to_value(&branches).unwrap());
    config.insert("branchCount".into(), Value::from(3));
    config.insert("wait".into(), Value::String("any".into()));
    let p = NodeAst::new("p", "control:parallel").with_config(config);

    let mut wf = workflow("parallel-any");
    wf.add_node(p);

    let plan = Arc::new(build_plan(&wf).unwrap());
    let result = execute(
        plan,
        ExecutionState::new("parallel-any"),
        Arc::new(RuntimeRegistry::with_builtins()),
        ExecuteOptions::default(),
        &RuntimeConfig::default(),
        None,
    )
    .await
    .unwrap();

    let output = result.node_output("p").unwrap();
    let Value::Array(items) = output else { panic!("expected an array output, got {output:?}") };
    assert_eq!(items.len(), 1);
    let winner = items[0].as_str().unwrap();
    assert!(["winner-0", "winner-1", "winner-2"].contains(&winner));
}

/// Breaks the enclosing loop/foreach the moment its bound `item` context
/// value equals 4; otherwise echoes the item back.
struct BreakAtFour;

#[async_trait]
impl NodeRuntime for BreakAtFour {
    async fn execute(&self, params: RuntimeParams<'_>) -> Result<Value, ExecutionEngineError> {
        let item = params.state.node_context.get("item").cloned().unwrap_or(Value::Null);
        if item == Value::from(4) {
            return Err(ExecutionEngineError::Break(BreakSignal::innermost()));
        }
        Ok(item)
    }
}

fn foreach_plan(max_concurrency: Option<usize>) -> Arc<ExecutionPlan> {
    let mut config = Map::new();
    config.insert(
        "collection".into(),
        Value::Array((1..=6).map(Value::from).collect()),
    );
    config.insert("itemVar".into(), Value::String("item".into()));
    config.insert("indexVar".into(), Value::String("index".into()));
    config.insert("bodyNodeIds".into(), Value::Array(vec![Value::String("body".into())]));
    if let Some(limit) = max_concurrency {
        config.insert("maxConcurrency".into(), Value::from(limit));
    }
    let fe = NodeAst::new("fe", "control:foreach").with_config(config);
    let body = NodeAst::new("body", "test:break_at_four");

    let mut nodes = HashMap::new();
    nodes.insert("fe".to_string(), fe);
    nodes.insert("body".to_string(), body);

    Arc::new(ExecutionPlan {
        workflow_id: "foreach-break".into(),
        total_nodes: 2,
        waves: vec![Wave { wave_number: 0, node_ids: vec!["fe".to_string()] }],
        nodes,
    })
}

fn break_registry() -> Arc<RuntimeRegistry> {
    let mut registry = RuntimeRegistry::with_builtins();
    registry.register("test:break_at_four", Arc::new(BreakAtFour));
    Arc::new(registry)
}

// Scenario 4a: sequential foreach stops at the break and leaves every later
// index unrun.
#[tokio::test]
async fn sequential_foreach_break_aborts_remaining_iterations() {
    let plan = foreach_plan(None);
    let result = execute(
        plan,
        ExecutionState::new("foreach-break-seq"),
        break_registry(),
        ExecuteOptions::default(),
        &RuntimeConfig::default(),
        None,
    )
    .await
    .unwrap();

    let output = result.node_output("fe").unwrap();
    let Value::Array(items) = output else { panic!("expected an array output, got {output:?}") };
    // items 1, 2, 3 echoed, then a null placeholder for the break at 4, then
    // nothing further.
    assert_eq!(items, &vec![Value::from(1), Value::from(2), Value::from(3), Value::Null]);
}

// Scenario 4b: concurrent foreach only aborts the breaking iteration; other
// in-flight iterations still complete and keep their slot.
#[tokio::test]
async fn concurrent_foreach_break_only_nulls_its_own_slot() {
    let plan = foreach_plan(Some(3));
    let result = execute(
        plan,
        ExecutionState::new("foreach-break-concurrent"),
        break_registry(),
        ExecuteOptions::default(),
        &RuntimeConfig::default(),
        None,
    )
    .await
    .unwrap();

    let output = result.node_output("fe").unwrap();
    let Value::Array(items) = output else { panic!("expected an array output, got {output:?}") };
    assert_eq!(items.len(), 6);
    assert_eq!(items[3], Value::Null);
    for (index, expected) in [(0, 1), (1, 2), (2, 3), (4, 5), (5, 6)] {
        assert_eq!(items[index], Value::from(expected));
    }
}

/// Fails unconditionally, counting invocations so the test can confirm the
/// retry loop actually exhausted every attempt before falling back.
struct AlwaysFails {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl NodeRuntime for AlwaysFails {
    async fn execute(&self, params: RuntimeParams<'_>) -> Result<Value, ExecutionEngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ExecutionEngineError::NodeExecution {
            node: params.node.id.clone(),
            message: "boom".into(),
        })
    }
}

// Scenario 5: the primary node exhausts its retries, then its fallback runs
// once with `$primaryError`/`$primaryInput` bound.
#[tokio::test]
async fn retry_exhaustion_invokes_the_fallback_node() {
    let calls = Arc::new(AtomicU32::new(0));

    let mut wf = workflow("retry-fallback");
    let primary = NodeAst::new("primary", "test:always_fails").with_error_config(ErrorConfig {
        max_retries: 2,
        backoff_base_ms: 1,
        backoff_kind: BackoffKind::Fixed,
        fallback_node_id: Some("fb".into()),
    });
    wf.add_node(primary);
    wf.add_node(template_node("fb", "recovered: {{$primaryError}}"));

    let plan = Arc::new(build_plan(&wf).unwrap());
    let mut registry = RuntimeRegistry::with_builtins();
    registry.register("test:always_fails", Arc::new(AlwaysFails { calls: calls.clone() }));

    let result = execute(
        plan,
        ExecutionState::new("retry-fallback"),
        Arc::new(registry),
        ExecuteOptions::default(),
        &RuntimeConfig::default(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3, "expected 1 initial attempt plus 2 retries");
    let output = result.node_output("primary").unwrap().as_str().unwrap().to_string();
    assert!(output.starts_with("recovered: "));
    assert!(output.contains("boom"));
}

// Scenario 6: the sandbox's security gate, unresolved-function lookup, and
// the ban on method-style calls each raise a distinctly wordable error.
#[tokio::test]
async fn expression_sandbox_rejects_prototype_access_and_method_calls() {
    let state = ExecutionState::new("expr");
    let ctx = EvaluationContext::for_node(&state, &HashMap::new());

    let proto_err = evaluate("$config.__proto__", &ctx).unwrap_err();
    assert!(proto_err.to_string().contains("security"), "got: {proto_err}");

    let undefined_err = evaluate("notDefinedAnywhere()", &ctx).unwrap_err();
    assert!(undefined_err.to_string().contains("not defined"), "got: {undefined_err}");

    let method_call_err = evaluate("$config.toString()", &ctx).unwrap_err();
    assert!(
        method_call_err.to_string().contains("direct function calls"),
        "got: {method_call_err}"
    );
}

// Scenario 7: a checkpoint left mid-run (wave 0 already succeeded, status
// failed) resumes from wave 1 onward rather than re-running `a`.
#[tokio::test]
async fn resume_skips_completed_waves_and_finishes_the_rest() {
    let wf = WorkflowBuilder::new("resume", "1.0.0")
        .node(template_node("a", "A"))
        .node(template_node("b", "B:{{input}}").with_input("a"))
        .node(template_node("c", "C:{{input}}").with_input("b"))
        .build()
        .unwrap();

    let plan = Arc::new(build_plan(&wf).unwrap());
    assert_eq!(plan.waves.len(), 3);

    let mut partial = ExecutionState::new("resume-run");
    partial.status = ExecutionStatus::Failed;
    partial.current_wave = 1;
    partial.record_success("a", NodeResult::success(Value::String("A".into()), chrono::Utc::now(), 1));

    let checkpoint_path =
        std::env::temp_dir().join(format!("wf-core-resume-test-{}.json", uuid::Uuid::new_v4()));
    checkpoint::save(&checkpoint_path, &partial).await.unwrap();
    assert!(wf_core::executor::can_resume(&checkpoint_path).await);

    let resumed = resume(
        plan,
        &checkpoint_path,
        HashMap::new(),
        Arc::new(RuntimeRegistry::with_builtins()),
        ExecuteOptions::default(),
        &RuntimeConfig::default(),
    )
    .await
    .unwrap();

    let _ = tokio::fs::remove_file(&checkpoint_path).await;

    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.node_output("a"), Some(&Value::String("A".into())));
    assert_eq!(resumed.node_output("b"), Some(&Value::String("B:A".into())));
    assert_eq!(resumed.node_output("c"), Some(&Value::String("C:B:A".into())));
}
