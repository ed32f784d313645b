//! Dependency analyzer and wave planner (§4.4, §4.5).
//!
//! The wave planner generalizes the same Kahn's-algorithm shape the
//! teacher uses for its connection-based topological sort, but groups
//! simultaneously-ready nodes into numbered waves instead of flattening
//! them into one ordering, and reports the residual node set on a cycle
//! rather than a bare "contains a cycle" message.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::WorkflowError;
use crate::execution::{ExecutionPlan, Wave};
use crate::node::NodeAst;
use crate::template::{segment_template, looks_like_template, TemplateSegment};
use crate::workflow::WorkflowAst;

/// Reverse-dependency map: node id -> set of node ids it depends on.
pub type DependencyMap = HashMap<String, HashSet<String>>;

/// Build the dependency map for a workflow (§4.4).
///
/// For every node: its explicit `input` is a dependency; every string in
/// `config` is scanned for template expressions, and any expression
/// segment that looks like a reference to another known node id (`X`,
/// `X.prop`, or `X.` appearing after `(`, `,`, `!`, or whitespace) adds
/// that node as a dependency. The scan never parses the expression
/// grammar — it is deliberately conservative string matching, so it may
/// over-approximate but must never miss an explicit reference.
pub fn build_dependencies(workflow: &WorkflowAst) -> DependencyMap {
    let known_ids: HashSet<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut deps: DependencyMap = HashMap::new();

    for node in &workflow.nodes {
        let mut node_deps: HashSet<String> = HashSet::new();

        if let Some(input) = &node.input {
            if known_ids.contains(input.as_str()) {
                node_deps.insert(input.clone());
            }
        }

        for value in node.config.values() {
            scan_value_for_refs(value, &node.id, &known_ids, &mut node_deps);
        }

        deps.insert(node.id.clone(), node_deps);
    }

    deps
}

fn scan_value_for_refs(
    value: &serde_json::Value,
    self_id: &str,
    known_ids: &HashSet<&str>,
    out: &mut HashSet<String>,
) {
    match value {
        serde_json::Value::String(s) => {
            if looks_like_template(s) {
                for segment in segment_template(s) {
                    if let TemplateSegment::Expression { raw, .. } = segment {
                        collect_node_refs(&raw, self_id, known_ids, out);
                    }
                }
            }
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                scan_value_for_refs(v, self_id, known_ids, out);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                scan_value_for_refs(v, self_id, known_ids, out);
            }
        }
        _ => {}
    }
}

/// Pattern-match candidate node-id references inside a raw expression
/// string, per §4.4 step 3's literal rule set.
fn collect_node_refs(expr: &str, self_id: &str, known_ids: &HashSet<&str>, out: &mut HashSet<String>) {
    for &id in known_ids {
        if id == self_id {
            continue;
        }
        if expr == id {
            out.insert(id.to_string());
            continue;
        }
        let prefixed = format!("{id}.");
        if expr.starts_with(&prefixed) {
            out.insert(id.to_string());
            continue;
        }
        for lead in ["(", ",", "!", " "] {
            if expr.contains(&format!("{lead}{prefixed}")) {
                out.insert(id.to_string());
                break;
            }
        }
    }
}

/// Kahn's algorithm over `deps`, grouping ready nodes into waves (§4.5).
///
/// On a cycle, returns `WorkflowError::CycleDetected` listing every node id
/// that never became ready — the residual set the spec asks for, not a
/// flat contains-a-cycle message.
pub fn plan_waves(node_ids: &[String], deps: &DependencyMap) -> Result<Vec<Wave>, WorkflowError> {
    let node_set: HashSet<&str> = node_ids.iter().map(String::as_str).collect();
    let mut unmet: HashMap<String, HashSet<String>> = HashMap::new();
    for id in node_ids {
        let empty = HashSet::new();
        let my_deps = deps.get(id).unwrap_or(&empty);
        unmet.insert(
            id.clone(),
            my_deps
                .iter()
                .filter(|d| node_set.contains(d.as_str()))
                .cloned()
                .collect(),
        );
    }

    // dependents[d] = nodes that depend on d, for decrementing unmet sets.
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    for (id, my_deps) in &unmet {
        for d in my_deps {
            dependents.entry(d.clone()).or_default().push(id.clone());
        }
    }

    let mut waves = Vec::new();
    let mut remaining: VecDeque<String> = node_ids.iter().cloned().collect();
    let mut wave_number = 0u32;

    while !remaining.is_empty() {
        let ready: Vec<String> = remaining
            .iter()
            .filter(|id| unmet.get(*id).map(|s| s.is_empty()).unwrap_or(true))
            .cloned()
            .collect();

        if ready.is_empty() {
            let residual: Vec<String> = remaining.into_iter().collect();
            return Err(WorkflowError::CycleDetected { residual });
        }

        let ready_set: HashSet<&str> = ready.iter().map(String::as_str).collect();
        remaining.retain(|id| !ready_set.contains(id.as_str()));

        for done in &ready {
            if let Some(downstream) = dependents.get(done) {
                for dep_id in downstream {
                    if let Some(set) = unmet.get_mut(dep_id) {
                        set.remove(done);
                    }
                }
            }
        }

        waves.push(Wave {
            wave_number,
            node_ids: ready,
        });
        wave_number += 1;
    }

    Ok(waves)
}

/// Build a full execution plan from a workflow: dependency analysis plus
/// wave planning, with a node lookup table for the executor.
pub fn build_plan(workflow: &WorkflowAst) -> Result<ExecutionPlan, WorkflowError> {
    let node_ids = workflow.node_ids();
    let deps = build_dependencies(workflow);
    let waves = plan_waves(&node_ids, &deps)?;

    let nodes: HashMap<String, NodeAst> = workflow
        .nodes
        .iter()
        .cloned()
        .map(|n| (n.id.clone(), n))
        .collect();

    Ok(ExecutionPlan {
        workflow_id: workflow.metadata.name.clone(),
        total_nodes: nodes.len(),
        waves,
        nodes,
    })
}
