//! Layered evaluation context assembly (§4.3).
//!
//! Precedence, lowest to highest: global context, phase context, node
//! context, then the reserved `$`-prefixed bindings, which always win
//! regardless of what a workflow author put in the context tables.

use std::collections::HashMap;

use serde_json::Value;
use wf_ast::execution::ExecutionState;

use super::functions::default_functions;
use super::FunctionImpl;

pub struct EvaluationContext {
    pub variables: HashMap<String, Value>,
    pub functions: HashMap<String, FunctionImpl>,
}

impl EvaluationContext {
    /// An empty context with only the built-in function table — useful for
    /// one-off evaluation and tests.
    pub fn minimal() -> Self {
        Self {
            variables: HashMap::new(),
            functions: default_functions(),
        }
    }

    /// Assemble the context a given node sees when its config is resolved
    /// (§4.3): global < phase < node context tables, merged in increasing
    /// precedence, plus the reserved bindings `$config`, `$secrets`,
    /// `$context`, `$env`, and every completed node's `nodeId.output`.
    ///
    /// `$secrets` carries real values here — the sandbox needs them to
    /// resolve, e.g., `{{ $secrets.apiKey }}`. Nothing in this module ever
    /// logs or serializes `variables` directly; callers that need to embed
    /// a context in an error or log line go through [`redacted_context`]
    /// instead, which replaces every secret value with `"[REDACTED]"`.
    pub fn for_node(state: &ExecutionState, env: &HashMap<String, String>) -> Self {
        let merged = merged_context(state);
        let mut variables = merged.clone();

        variables.insert("$config".into(), map_to_value(&state.config));
        variables.insert("$secrets".into(), string_map_to_value(&state.secrets));
        variables.insert("$context".into(), Value::Object(merged.into_iter().collect()));
        variables.insert("$env".into(), string_map_to_value(env));

        Self {
            variables,
            functions: default_functions(),
        }
    }
}

/// Global < phase < node context tables merged in increasing precedence —
/// the same layering `variables` and `$context` both present to expressions.
fn merged_context(state: &ExecutionState) -> HashMap<String, Value> {
    let mut merged = HashMap::new();
    for (k, v) in &state.global_context {
        merged.insert(k.clone(), v.clone());
    }
    for (k, v) in &state.phase_context {
        merged.insert(k.clone(), v.clone());
    }
    // node_context already holds the per-node `nodeId -> {output}`
    // bindings recorded by `ExecutionState::record_success`.
    for (k, v) in &state.node_context {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

fn map_to_value(map: &HashMap<String, Value>) -> Value {
    Value::Object(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn string_map_to_value(map: &HashMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// A secret-redacted snapshot of `state`'s merged context (§2, §4.3), safe
/// to embed in an error message or log line: every value under `$secrets`
/// becomes the literal string `"[REDACTED]"`, regardless of the value's
/// original shape, while every secret's key is kept so the shape of the
/// redaction is still legible.
pub fn redacted_context(state: &ExecutionState) -> Value {
    let mut merged = merged_context(state);
    let redacted_secrets = state
        .secrets
        .keys()
        .map(|k| (k.clone(), Value::String("[REDACTED]".into())))
        .collect();
    merged.insert("$secrets".into(), Value::Object(redacted_secrets));
    Value::Object(merged.into_iter().collect())
}
