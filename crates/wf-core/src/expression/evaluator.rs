//! Tree-walking evaluator (§4.2) with the security gate and strict/loose
//! equality distinction the teacher's evaluator did not have.

use serde_json::{json, Value};

use super::ast::{BinaryOperator, Expr, Literal, TemplatePart, UnaryOperator};
use super::{EvaluationContext, ExpressionError, ExpressionResult};

/// Property names that would reach into host-language internals if
/// exposed. Rejected unconditionally as a structural rule on the name
/// itself, never on object identity (§9 design note).
const FORBIDDEN_PROPERTIES: [&str; 3] = ["__proto__", "constructor", "prototype"];

pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, expr: &Expr, ctx: &EvaluationContext) -> ExpressionResult<Value> {
        match expr {
            Expr::Literal(lit) => Ok(literal_to_value(lit)),
            Expr::Identifier(name) => Ok(ctx.variables.get(name).cloned().unwrap_or(Value::Null)),
            Expr::Member { object, property, computed } => self.eval_member(object, property, *computed, ctx),
            Expr::Binary { left, op, right } => self.eval_binary(left, *op, right, ctx),
            Expr::Unary { op, operand } => self.eval_unary(*op, operand, ctx),
            Expr::Conditional { test, consequent, alternate } => {
                let test_val = self.evaluate(test, ctx)?;
                if is_truthy(&test_val) {
                    self.evaluate(consequent, ctx)
                } else {
                    self.evaluate(alternate, ctx)
                }
            }
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.evaluate(item, ctx)?);
                }
                Ok(Value::Array(out))
            }
            Expr::Call { callee, args } => self.eval_call(callee, args, ctx),
            Expr::Template(parts) => self.eval_template(parts, ctx),
        }
    }

    fn eval_member(
        &self,
        object: &Expr,
        property: &Expr,
        computed: bool,
        ctx: &EvaluationContext,
    ) -> ExpressionResult<Value> {
        let object_val = self.evaluate(object, ctx)?;
        if object_val.is_null() {
            // Null-safe chaining: absent object yields absent.
            return Ok(Value::Null);
        }

        let key = if computed {
            value_to_string(&self.evaluate(property, ctx)?)
        } else {
            match property {
                Expr::Literal(Literal::String(s)) => s.clone(),
                other => value_to_string(&self.evaluate(other, ctx)?),
            }
        };

        if FORBIDDEN_PROPERTIES.contains(&key.as_str()) {
            return Err(ExpressionError::EvaluationError(format!(
                "access to '{key}' is blocked for security reasons"
            )));
        }

        Ok(match &object_val {
            Value::Object(map) => map.get(&key).cloned().unwrap_or(Value::Null),
            Value::Array(items) => {
                if let Ok(idx) = key.parse::<usize>() {
                    items.get(idx).cloned().unwrap_or(Value::Null)
                } else {
                    Value::Null
                }
            }
            Value::String(s) => {
                if let Ok(idx) = key.parse::<usize>() {
                    s.chars().nth(idx).map(|c| json!(c.to_string())).unwrap_or(Value::Null)
                } else {
                    Value::Null
                }
            }
            _ => Value::Null,
        })
    }

    fn eval_call(&self, callee: &str, args: &[Expr], ctx: &EvaluationContext) -> ExpressionResult<Value> {
        let func = match ctx.functions.get(callee) {
            Some(f) => f,
            None => {
                return Err(ExpressionError::EvaluationError(format!("'{callee}' is not defined")))
            }
        };
        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            arg_values.push(self.evaluate(arg, ctx)?);
        }
        func(&arg_values)
    }

    fn eval_binary(
        &self,
        left: &Expr,
        op: BinaryOperator,
        right: &Expr,
        ctx: &EvaluationContext,
    ) -> ExpressionResult<Value> {
        match op {
            BinaryOperator::And => {
                let l = self.evaluate(left, ctx)?;
                if !is_truthy(&l) {
                    return Ok(l);
                }
                self.evaluate(right, ctx)
            }
            BinaryOperator::Or => {
                let l = self.evaluate(left, ctx)?;
                if is_truthy(&l) {
                    return Ok(l);
                }
                self.evaluate(right, ctx)
            }
            BinaryOperator::NullishCoalesce => {
                let l = self.evaluate(left, ctx)?;
                if l.is_null() {
                    self.evaluate(right, ctx)
                } else {
                    Ok(l)
                }
            }
            _ => {
                let l = self.evaluate(left, ctx)?;
                let r = self.evaluate(right, ctx)?;
                eval_binary_values(op, &l, &r)
            }
        }
    }

    fn eval_unary(&self, op: UnaryOperator, operand: &Expr, ctx: &EvaluationContext) -> ExpressionResult<Value> {
        let val = self.evaluate(operand, ctx)?;
        Ok(match op {
            UnaryOperator::Not => json!(!is_truthy(&val)),
            UnaryOperator::Neg => json!(-value_to_number(&val)),
            UnaryOperator::Plus => json!(value_to_number(&val)),
        })
    }

    fn eval_template(&self, parts: &[TemplatePart], ctx: &EvaluationContext) -> ExpressionResult<Value> {
        let mut out = String::new();
        for part in parts {
            match part {
                TemplatePart::Text(text) => out.push_str(text),
                TemplatePart::Expression { expr, raw, start, end } => {
                    let value = self.evaluate(expr, ctx).map_err(|e| {
                        ExpressionError::TemplateError {
                            source: Box::new(e),
                            expression: raw.clone(),
                            position: (*start, *end),
                        }
                    })?;
                    out.push_str(&render_template_value(&value));
                }
            }
        }
        Ok(Value::String(out))
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn literal_to_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Boolean(b) => Value::Bool(*b),
        Literal::Number(n) => {
            if n.fract() == 0.0 && n.is_finite() {
                json!(*n as i64)
            } else {
                json!(*n)
            }
        }
        Literal::String(s) => Value::String(s.clone()),
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn value_to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => if *b { 1.0 } else { 0.0 },
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// Render a value for template interpolation. Absent values render as
/// empty string (unlike the teacher's literal "null" rendering);
/// non-primitive values render as canonical JSON; primitives coerce to
/// string.
pub fn render_template_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value_to_string(value),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn values_loose_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            value_to_number(a) == value_to_number(b)
        }
        (Value::Bool(_), _) | (_, Value::Bool(_)) => is_truthy(a) == is_truthy(b),
        (Value::Null, Value::Null) => true,
        _ => false,
    }
}

fn eval_binary_values(op: BinaryOperator, l: &Value, r: &Value) -> ExpressionResult<Value> {
    Ok(match op {
        BinaryOperator::Add => {
            if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) {
                json!(format!("{}{}", value_to_string(l), value_to_string(r)))
            } else {
                json!(value_to_number(l) + value_to_number(r))
            }
        }
        BinaryOperator::Sub => json!(value_to_number(l) - value_to_number(r)),
        BinaryOperator::Mul => json!(value_to_number(l) * value_to_number(r)),
        BinaryOperator::Div => {
            let (ln, rn) = (value_to_number(l), value_to_number(r));
            if rn == 0.0 {
                json!(if ln == 0.0 { f64::NAN } else { f64::INFINITY * ln.signum() })
            } else {
                json!(ln / rn)
            }
        }
        BinaryOperator::Mod => {
            let (ln, rn) = (value_to_number(l), value_to_number(r));
            if rn == 0.0 {
                json!(f64::NAN)
            } else {
                json!(ln % rn)
            }
        }
        BinaryOperator::Eq => json!(values_loose_equal(l, r)),
        BinaryOperator::Ne => json!(!values_loose_equal(l, r)),
        BinaryOperator::StrictEq => json!(l == r),
        BinaryOperator::StrictNe => json!(l != r),
        BinaryOperator::Lt | BinaryOperator::Le | BinaryOperator::Gt | BinaryOperator::Ge => {
            json!(compare(op, l, r))
        }
        BinaryOperator::And | BinaryOperator::Or | BinaryOperator::NullishCoalesce => unreachable!(
            "short-circuit operators are handled before values are evaluated"
        ),
    })
}

fn compare(op: BinaryOperator, l: &Value, r: &Value) -> bool {
    if let (Value::String(a), Value::String(b)) = (l, r) {
        return match op {
            BinaryOperator::Lt => a < b,
            BinaryOperator::Le => a <= b,
            BinaryOperator::Gt => a > b,
            BinaryOperator::Ge => a >= b,
            _ => false,
        };
    }
    let (a, b) = (value_to_number(l), value_to_number(r));
    match op {
        BinaryOperator::Lt => a < b,
        BinaryOperator::Le => a <= b,
        BinaryOperator::Gt => a > b,
        BinaryOperator::Ge => a >= b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{parse, parse_template};
    use crate::expression::context::EvaluationContext;

    fn ctx() -> EvaluationContext {
        EvaluationContext::minimal()
    }

    #[test]
    fn evaluates_arithmetic() {
        let e = ExpressionEvaluator::new();
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(e.evaluate(&expr, &ctx()).unwrap(), json!(7));
    }

    #[test]
    fn string_concat_with_plus() {
        let e = ExpressionEvaluator::new();
        let expr = parse(r#""a" + "b""#).unwrap();
        assert_eq!(e.evaluate(&expr, &ctx()).unwrap(), json!("ab"));
    }

    #[test]
    fn loose_vs_strict_equality() {
        let e = ExpressionEvaluator::new();
        assert_eq!(e.evaluate(&parse("1 == \"1\"").unwrap(), &ctx()).unwrap(), json!(true));
        assert_eq!(e.evaluate(&parse("1 === \"1\"").unwrap(), &ctx()).unwrap(), json!(false));
    }

    #[test]
    fn nullish_coalesce_treats_only_null_as_absent() {
        let e = ExpressionEvaluator::new();
        let mut c = ctx();
        c.variables.insert("zero".into(), json!(0));
        c.variables.insert("empty".into(), json!(""));
        c.variables.insert("falseVal".into(), json!(false));
        assert_eq!(e.evaluate(&parse("zero ?? 9").unwrap(), &c).unwrap(), json!(0));
        assert_eq!(e.evaluate(&parse("empty ?? 9").unwrap(), &c).unwrap(), json!(""));
        assert_eq!(e.evaluate(&parse("falseVal ?? 9").unwrap(), &c).unwrap(), json!(false));
        assert_eq!(e.evaluate(&parse("missing ?? 9").unwrap(), &c).unwrap(), json!(9));
    }

    #[test]
    fn conditional_only_evaluates_selected_branch() {
        let e = ExpressionEvaluator::new();
        // foo() is undefined; it must not be evaluated on the untaken branch.
        let expr = parse("true ? 1 : foo()").unwrap();
        assert_eq!(e.evaluate(&expr, &ctx()).unwrap(), json!(1));
    }

    #[test]
    fn forbidden_property_names_are_rejected() {
        let e = ExpressionEvaluator::new();
        let mut c = ctx();
        c.variables.insert("obj".into(), json!({}));
        let err = e.evaluate(&parse("obj.__proto__").unwrap(), &c).unwrap_err();
        assert!(err.to_string().contains("security"));
    }

    #[test]
    fn undefined_function_call_is_not_defined() {
        let e = ExpressionEvaluator::new();
        let err = e.evaluate(&parse("foo()").unwrap(), &ctx()).unwrap_err();
        assert!(err.to_string().contains("not defined"));
    }

    #[test]
    fn absent_values_render_as_empty_string_in_templates() {
        let e = ExpressionEvaluator::new();
        let expr = parse_template("[{{ missing }}]").unwrap();
        let result = e.evaluate(&expr, &ctx()).unwrap();
        assert_eq!(result, json!("[]"));
    }

    #[test]
    fn chained_member_access_on_null_is_absent_not_error() {
        let e = ExpressionEvaluator::new();
        let expr = parse("missing.field.nested").unwrap();
        assert_eq!(e.evaluate(&expr, &ctx()).unwrap(), Value::Null);
    }
}
