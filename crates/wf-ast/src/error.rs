//! Error types shared by the AST, planner and execution-state model.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building or validating a plan from a [`crate::workflow::WorkflowAst`].
///
/// The core assumes the AST itself has already passed external structural /
/// reference / expression validation (see the crate-level docs); these
/// variants cover the defensive post-conditions the planner still owns,
/// plus lookups that can fail once execution is underway.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("cycle detected; residual nodes: {}", residual.join(", "))]
    CycleDetected { residual: Vec<String> },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),
}

/// The error-kind taxonomy a caller may need to branch on (§7 of the spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Expression,
    UnknownRuntime,
    Runtime,
    Timeout,
    Break,
    CycleDetected,
}

/// A user-visible execution failure: node id, kind, message, and — for
/// expression errors — the offending expression text and source position.
///
/// Secret values must never appear here; callers are expected to have
/// already redacted any context before building the message string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    pub node_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
    pub expression: Option<String>,
    pub position: Option<(usize, usize)>,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            node_id: None,
            kind,
            message: message.into(),
            expression: None,
            position: None,
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_expression(mut self, expr: impl Into<String>, position: Option<(usize, usize)>) -> Self {
        self.expression = Some(expr.into());
        self.position = position;
        self
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(node_id) = &self.node_id {
            write!(f, " (node: {node_id})")?;
        }
        if let Some(expr) = &self.expression {
            write!(f, " [expression: {expr}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecutionError {}
