//! Workflow definition types: the input contract the scheduler consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::WorkflowError;
use crate::node::NodeAst;

/// Workflow-level metadata parsed from the frontmatter section of the
/// workflow file (parsing itself is out of this crate's scope — the core
/// consumes the resulting struct directly).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Declared config field schemas (name -> schema value); the core does
    /// not validate caller-supplied config against these, only resolves
    /// defaults into `ExecutionState::config`.
    #[serde(default)]
    pub config: HashMap<String, Value>,
    /// Declared secret names only — values are supplied at run time.
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schemas: Option<Value>,
}

/// Maps a node id to its original source location, for diagnostics that
/// need to point back at authored text rather than just the AST.
pub type SourceMap = HashMap<String, crate::node::SourceLoc>;

/// A fully-parsed workflow: metadata plus its ordered top-level nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowAst {
    pub metadata: Metadata,
    pub nodes: Vec<NodeAst>,
    #[serde(default)]
    pub source_map: SourceMap,
}

impl WorkflowAst {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            nodes: Vec::new(),
            source_map: SourceMap::new(),
        }
    }

    pub fn add_node(&mut self, node: NodeAst) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn node(&self, id: &str) -> Option<&NodeAst> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Defensive re-validation of invariants the core is otherwise allowed
    /// to assume hold (unique ids, resolvable `input` references). External
    /// validators are the primary gate; this exists as a guard for AST
    /// values constructed directly by a caller (e.g. in tests) rather than
    /// produced by the upstream parser + validator pipeline.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.clone()) {
                return Err(WorkflowError::DuplicateNodeId(node.id.clone()));
            }
        }
        for node in &self.nodes {
            if let Some(input) = &node.input {
                if self.node(input).is_none() {
                    return Err(WorkflowError::InvalidWorkflow(format!(
                        "node '{}' references unknown input '{}'",
                        node.id, input
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Fluent builder mirroring the teacher's `WorkflowBuilder`, convenient for
/// tests and demos that construct an AST directly rather than through the
/// markdown/XML front end.
#[derive(Debug, Default)]
pub struct WorkflowBuilder {
    workflow: WorkflowAst,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            workflow: WorkflowAst::new(Metadata {
                name: name.into(),
                version: version.into(),
                ..Default::default()
            }),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.workflow.metadata.description = Some(description.into());
        self
    }

    pub fn secret(mut self, name: impl Into<String>) -> Self {
        self.workflow.metadata.secrets.push(name.into());
        self
    }

    pub fn config(mut self, name: impl Into<String>, default: Value) -> Self {
        self.workflow.metadata.config.insert(name.into(), default);
        self
    }

    pub fn node(mut self, node: NodeAst) -> Self {
        self.workflow.nodes.push(node);
        self
    }

    pub fn build(self) -> Result<WorkflowAst, WorkflowError> {
        self.workflow.validate()?;
        Ok(self.workflow)
    }

    pub fn build_unchecked(self) -> WorkflowAst {
        self.workflow
    }
}
