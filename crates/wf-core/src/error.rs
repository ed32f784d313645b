//! Errors that can occur during workflow execution (§7).

use thiserror::Error;

use crate::control_flow::BreakSignal;
use crate::expression::ExpressionError;

/// Top-level executor error. `Break` is data, not a panic (§9's design
/// note): loop/foreach handlers match on it explicitly via `Result`.
#[derive(Error, Debug, Clone)]
pub enum ExecutionEngineError {
    #[error("workflow error: {0}")]
    Workflow(#[from] wf_ast::WorkflowError),

    #[error("node execution error in '{node}': {message}")]
    NodeExecution { node: String, message: String },

    #[error("unknown runtime type: {0}")]
    UnknownRuntime(String),

    #[error("execution was cancelled")]
    Cancelled,

    #[error("execution timed out after {0}ms")]
    Timeout(u64),

    #[error("invalid execution state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error("break signal: {0:?}")]
    Break(BreakSignal),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("{0} of {1} wave tasks failed: {2}")]
    AggregateWaveFailure(usize, usize, String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecutionEngineError {
    /// True for errors that represent a non-error control-flow signal
    /// rather than a real failure.
    pub fn is_break(&self) -> bool {
        matches!(self, ExecutionEngineError::Break(_))
    }
}

impl From<ExecutionEngineError> for wf_ast::ExecutionError {
    fn from(e: ExecutionEngineError) -> Self {
        use wf_ast::ErrorKind;
        let kind = match &e {
            ExecutionEngineError::Expression(_) => ErrorKind::Expression,
            ExecutionEngineError::UnknownRuntime(_) => ErrorKind::UnknownRuntime,
            ExecutionEngineError::Timeout(_) => ErrorKind::Timeout,
            ExecutionEngineError::Break(_) => ErrorKind::Break,
            ExecutionEngineError::Workflow(wf_ast::WorkflowError::CycleDetected { .. }) => {
                ErrorKind::CycleDetected
            }
            _ => ErrorKind::Runtime,
        };
        let node_id = match &e {
            ExecutionEngineError::NodeExecution { node, .. } => Some(node.clone()),
            _ => None,
        };
        let mut err = wf_ast::ExecutionError::new(kind, e.to_string());
        if let Some(id) = node_id {
            err = err.with_node(id);
        }
        if let ExecutionEngineError::Expression(ExpressionError::TemplateError {
            expression,
            position,
            ..
        }) = &e
        {
            err = err.with_expression(expression.clone(), Some(*position));
        }
        err
    }
}
