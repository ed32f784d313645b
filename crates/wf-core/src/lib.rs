//! # wf-core
//!
//! Workflow execution engine: the sandboxed expression language, the
//! concurrency and retry primitives, the control-flow handlers, and the
//! wave-driven executor built on top of `wf-ast`'s plan and state types.

pub mod checkpoint;
pub mod config;
pub mod control_flow;
pub mod error;
pub mod executor;
pub mod expression;
pub mod feedback;
pub mod retry;
pub mod runtime;
pub mod semaphore;

pub use config::{ExecuteOptions, RuntimeConfig};
pub use error::ExecutionEngineError;
pub use executor::{execute, execute_node, execute_wave, resume, run_node, ErrorHandler, ExecutorCtx};
pub use expression::{evaluate, evaluate_template, EvaluationContext, ExpressionError, ExpressionResult};
pub use runtime::{NodeRuntime, RuntimeParams, RuntimeRegistry};
pub use semaphore::ConcurrencyGate;
