//! Whitelisted functions callable from expressions (§4.1, §9).
//!
//! Every entry is a bare-identifier call (`upper(x)`, never `x.upper()`);
//! the parser only ever produces `Expr::Call { callee, .. }` for a bare
//! identifier, so there is no method-call surface to gate separately. All
//! functions here are pure except `now`, which is documented as such, and
//! none exposes anything beyond what `$env` already makes available.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::evaluator::value_to_number;
use super::{ExpressionError, ExpressionResult};

/// A whitelisted function implementation: arguments in, single value out.
pub type FunctionImpl = Arc<dyn Fn(&[Value]) -> ExpressionResult<Value> + Send + Sync>;

pub fn default_functions() -> HashMap<String, FunctionImpl> {
    let mut functions: HashMap<String, FunctionImpl> = HashMap::new();
    functions.insert("json_encode".into(), Arc::new(json_encode));
    functions.insert("json_decode".into(), Arc::new(json_decode));
    functions.insert("length".into(), Arc::new(length));
    functions.insert("concat".into(), Arc::new(concat));
    functions.insert("now".into(), Arc::new(now));
    functions.insert("upper".into(), Arc::new(upper));
    functions.insert("lower".into(), Arc::new(lower));
    functions
}

fn json_encode(args: &[Value]) -> ExpressionResult<Value> {
    let value = args.first().cloned().unwrap_or(Value::Null);
    Ok(Value::String(value.to_string()))
}

fn json_decode(args: &[Value]) -> ExpressionResult<Value> {
    let raw = match args.first() {
        Some(Value::String(s)) => s,
        _ => return Err(ExpressionError::EvaluationError("json_decode expects a string argument".into())),
    };
    serde_json::from_str(raw)
        .map_err(|e| ExpressionError::EvaluationError(format!("json_decode: invalid JSON: {e}")))
}

fn length(args: &[Value]) -> ExpressionResult<Value> {
    let len = match args.first() {
        Some(Value::String(s)) => s.chars().count(),
        Some(Value::Array(items)) => items.len(),
        Some(Value::Object(map)) => map.len(),
        Some(Value::Null) | None => 0,
        Some(other) => {
            return Err(ExpressionError::EvaluationError(format!(
                "length is not defined for {other}"
            )))
        }
    };
    Ok(Value::from(len))
}

fn concat(args: &[Value]) -> ExpressionResult<Value> {
    let mut out = String::new();
    for arg in args {
        match arg {
            Value::String(s) => out.push_str(s),
            Value::Null => {}
            other => out.push_str(&other.to_string()),
        }
    }
    Ok(Value::String(out))
}

/// Current UTC time as an ISO-8601 string. The only non-pure builtin.
fn now(_args: &[Value]) -> ExpressionResult<Value> {
    Ok(Value::String(chrono::Utc::now().to_rfc3339()))
}

fn upper(args: &[Value]) -> ExpressionResult<Value> {
    let s = args.first().map(value_as_string).unwrap_or_default();
    Ok(Value::String(s.to_uppercase()))
}

fn lower(args: &[Value]) -> ExpressionResult<Value> {
    let s = args.first().map(value_as_string).unwrap_or_default();
    Ok(Value::String(s.to_lowercase()))
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(_) => value_to_number(value).to_string(),
        other => other.to_string(),
    }
}
