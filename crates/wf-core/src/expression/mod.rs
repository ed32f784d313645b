//! Sandboxed expression language (§4.1-§4.3): lexer/parser, AST, evaluator,
//! and the layered evaluation context nodes are evaluated against.

pub mod ast;
pub mod context;
pub mod evaluator;
pub mod functions;
pub mod parser;

pub use ast::{BinaryOperator, Expr, Literal, TemplatePart, UnaryOperator};
pub use context::{redacted_context, EvaluationContext};
pub use evaluator::ExpressionEvaluator;
pub use functions::FunctionImpl;
pub use parser::{parse, parse_template};

use thiserror::Error;

pub type ExpressionResult<T> = Result<T, ExpressionError>;

/// Errors surfaced by expression parsing and evaluation (§4.2, §9).
///
/// Wording matters here: the security gate, the ban on method-style calls,
/// and unresolved-function lookups each need a message a caller can match
/// on (`.to_string().contains("security")`, `"not defined"`, etc.) without
/// depending on enum-variant layout.
#[derive(Error, Debug, Clone)]
pub enum ExpressionError {
    #[error("expression parse error: {0}")]
    ParseError(String),

    #[error("expression evaluation error: {0}")]
    EvaluationError(String),

    #[error("error evaluating template expression `{expression}` at {position:?}: {source}")]
    TemplateError {
        #[source]
        source: Box<ExpressionError>,
        expression: String,
        position: (usize, usize),
    },
}

/// Evaluate a standalone expression against a context in one call.
pub fn evaluate(input: &str, ctx: &EvaluationContext) -> ExpressionResult<serde_json::Value> {
    let expr = parse(input)?;
    ExpressionEvaluator::new().evaluate(&expr, ctx)
}

/// Evaluate a `{{ }}`-templated string against a context in one call.
pub fn evaluate_template(input: &str, ctx: &EvaluationContext) -> ExpressionResult<serde_json::Value> {
    let expr = parse_template(input)?;
    ExpressionEvaluator::new().evaluate(&expr, ctx)
}
