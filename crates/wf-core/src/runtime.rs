//! Runtime plug-in contract and registry (§6, §4.8.3).
//!
//! A runtime registers under a string key (`<kind>:source`,
//! `transform:<kind>`, `control:<kind>`, `checkpoint`, `temporal:*`,
//! `composition:*`) and exposes a uniform `execute(params) -> output`
//! contract. Concrete I/O runtimes (http, file, database, AI) are external
//! collaborators per §1; this module carries the trait, the registry, and
//! the handful of built-in runtimes needed to drive the control-flow
//! descriptors and the template transform used throughout §8's scenarios.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wf_ast::execution::ExecutionState;
use wf_ast::node::NodeAst;

use crate::error::ExecutionEngineError;
use crate::expression::{evaluate_template, EvaluationContext};

/// The arguments a runtime receives for a single invocation.
pub struct RuntimeParams<'a> {
    pub node: &'a NodeAst,
    pub input: &'a Value,
    pub config: &'a serde_json::Map<String, Value>,
    pub state: &'a ExecutionState,
    pub signal: &'a CancellationToken,
}

/// A pluggable node runtime (§6).
#[async_trait]
pub trait NodeRuntime: Send + Sync {
    async fn execute(&self, params: RuntimeParams<'_>) -> Result<Value, ExecutionEngineError>;
}

/// String-keyed lookup table of registered runtimes.
#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    runtimes: HashMap<String, Arc<dyn NodeRuntime>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self { runtimes: HashMap::new() }
    }

    pub fn register(&mut self, key: impl Into<String>, runtime: Arc<dyn NodeRuntime>) -> &mut Self {
        self.runtimes.insert(key.into(), runtime);
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn NodeRuntime>> {
        self.runtimes.get(key).cloned()
    }

    /// A registry pre-populated with the built-in demo/control runtimes.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("transform:template", Arc::new(TemplateTransform));
        registry.register("transform:passthrough", Arc::new(PassthroughTransform));
        registry.register("control:parallel", Arc::new(DescriptorRuntime));
        registry.register("control:foreach", Arc::new(DescriptorRuntime));
        registry.register("control:loop", Arc::new(DescriptorRuntime));
        registry.register("control:timeout", Arc::new(DescriptorRuntime));
        registry
    }
}

/// `control:*` — hands its own resolved config straight back as output, so
/// the executor's structural classification (`control_flow::classify`) can
/// parse it into a `ParallelResult`/`ForeachResult`/`LoopResult`/
/// `TimeoutResult`. A control node's "work" is entirely in its config
/// shape, not in any side effect this runtime performs.
pub struct DescriptorRuntime;

#[async_trait]
impl NodeRuntime for DescriptorRuntime {
    async fn execute(&self, params: RuntimeParams<'_>) -> Result<Value, ExecutionEngineError> {
        Ok(Value::Object(params.config.clone()))
    }
}

/// `transform:template` — resolves a single `template` config field against
/// the node's evaluation context and returns the rendered string. Grounds
/// §8 scenarios 1 and 2, both of which use plain template transforms.
pub struct TemplateTransform;

#[async_trait]
impl NodeRuntime for TemplateTransform {
    async fn execute(&self, params: RuntimeParams<'_>) -> Result<Value, ExecutionEngineError> {
        let template = params
            .config
            .get("template")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ExecutionEngineError::NodeExecution {
                    node: params.node.id.clone(),
                    message: "transform:template requires a string `template` config field".into(),
                }
            })?;
        let ctx = EvaluationContext::for_node(params.state, &std::collections::HashMap::new());
        let value = evaluate_template(template, &ctx)?;
        Ok(value)
    }
}

/// `transform:passthrough` — returns the node's resolved input unchanged.
/// Useful as a no-op placeholder in demos and tests.
pub struct PassthroughTransform;

#[async_trait]
impl NodeRuntime for PassthroughTransform {
    async fn execute(&self, params: RuntimeParams<'_>) -> Result<Value, ExecutionEngineError> {
        Ok(params.input.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;
    use wf_ast::execution::ExecutionState;

    #[tokio::test]
    async fn template_transform_renders_against_node_context() {
        let mut state = ExecutionState::new("wf");
        state.node_context.insert("greeting".into(), Value::String("hi".into()));
        let node = NodeAst::new("n", "transform:template");
        let mut config = serde_json::Map::new();
        config.insert("template".into(), Value::String("{{ greeting }} there".into()));
        let runtime = TemplateTransform;
        let signal = CancellationToken::new();
        let result = runtime
            .execute(RuntimeParams {
                node: &node,
                input: &Value::Null,
                config: &config,
                state: &state,
                signal: &signal,
            })
            .await
            .unwrap();
        assert_eq!(result, Value::String("hi there".into()));
    }

    #[tokio::test]
    async fn registry_resolves_registered_keys_and_rejects_unknown() {
        let registry = RuntimeRegistry::with_builtins();
        assert!(registry.get("transform:template").is_some());
        assert!(registry.get("nonexistent:kind").is_none());
    }
}
