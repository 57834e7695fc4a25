//! Expression evaluation against an attribute snapshot.

use serde_json::Value;
use std::cmp::Ordering;

use super::ast::*;
use crate::attributes::json_kind;
use crate::types::Attributes;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("cannot combine absent operand '{0}'")]
    AbsentOperand(String),

    #[error("cannot combine {0} operand")]
    UnsupportedOperand(&'static str),

    #[error("numeric result is not representable")]
    NumericOverflow,

    #[error("action produced an invalid value for attribute '{attribute}': {reason}")]
    InvalidResult { attribute: String, reason: String },
}

/// Evaluate a guard. Missing attributes are absent, never an error.
pub fn evaluate_guard(guard: &Guard, attrs: &Attributes) -> bool {
    match guard {
        Guard::Truthy(operand) => truthy(resolve(operand, attrs)),
        Guard::Compare { lhs, op, rhs } => {
            let (l, r) = (resolve(lhs, attrs), resolve(rhs, attrs));
            match op {
                CmpOp::Eq => values_equal(l, r),
                CmpOp::Ne => !values_equal(l, r),
                CmpOp::Lt => order(l, r) == Some(Ordering::Less),
                CmpOp::Le => matches!(order(l, r), Some(Ordering::Less | Ordering::Equal)),
                CmpOp::Gt => order(l, r) == Some(Ordering::Greater),
                CmpOp::Ge => matches!(order(l, r), Some(Ordering::Greater | Ordering::Equal)),
            }
        }
        Guard::Present(name) => lookup(attrs, name).is_some(),
        Guard::Absent(name) => lookup(attrs, name).is_none(),
        Guard::Not(inner) => !evaluate_guard(inner, attrs),
        Guard::And(items) => items.iter().all(|g| evaluate_guard(g, attrs)),
        Guard::Or(items) => items.iter().any(|g| evaluate_guard(g, attrs)),
    }
}

/// Apply an action in place. Each statement sees the writes of the ones
/// before it.
pub fn apply_action(action: &Action, attrs: &mut Attributes) -> Result<(), EvalError> {
    for stmt in &action.statements {
        match stmt {
            Statement::Clear(target) => {
                attrs.remove(target);
            }
            Statement::Set { target, value } => match evaluate_value(value, attrs)? {
                Some(v) => {
                    attrs.insert(target.clone(), v);
                }
                None => {
                    attrs.remove(target);
                }
            },
        }
    }
    Ok(())
}

fn lookup<'a>(attrs: &'a Attributes, name: &str) -> Option<&'a Value> {
    attrs.get(name).filter(|v| !v.is_null())
}

fn resolve<'a>(operand: &'a Operand, attrs: &'a Attributes) -> Option<&'a Value> {
    match operand {
        Operand::Attr(name) => lookup(attrs, name),
        Operand::Literal(Value::Null) => None,
        Operand::Literal(v) => Some(v),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(_)) => true,
    }
}

fn values_equal(l: Option<&Value>, r: Option<&Value>) -> bool {
    match (l, r) {
        (None, None) => true,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a.as_f64() == b.as_f64(),
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn order(l: Option<&Value>, r: Option<&Value>) -> Option<Ordering> {
    match (l?, r?) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn evaluate_value(expr: &ValueExpr, attrs: &Attributes) -> Result<Option<Value>, EvalError> {
    if let [single] = expr.terms.as_slice() {
        return Ok(resolve(single, attrs).cloned());
    }

    let mut values = Vec::with_capacity(expr.terms.len());
    for term in &expr.terms {
        match resolve(term, attrs) {
            Some(v) => values.push(v),
            None => {
                let name = match term {
                    Operand::Attr(name) => name.clone(),
                    Operand::Literal(_) => "null".to_string(),
                };
                return Err(EvalError::AbsentOperand(name));
            }
        }
    }

    if values.iter().all(|v| v.is_number()) {
        sum(&values).map(Some)
    } else {
        concat(&values).map(|s| Some(Value::String(s)))
    }
}

fn sum(values: &[&Value]) -> Result<Value, EvalError> {
    if values.iter().all(|v| v.is_i64()) {
        let mut total: i64 = 0;
        for v in values {
            let n = v.as_i64().ok_or(EvalError::NumericOverflow)?;
            total = total.checked_add(n).ok_or(EvalError::NumericOverflow)?;
        }
        return Ok(Value::from(total));
    }

    let total: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
    serde_json::Number::from_f64(total)
        .map(Value::Number)
        .ok_or(EvalError::NumericOverflow)
}

fn concat(values: &[&Value]) -> Result<String, EvalError> {
    let mut out = String::new();
    for v in values {
        match v {
            Value::String(s) => out.push_str(s),
            Value::Number(n) => out.push_str(&n.to_string()),
            other => return Err(EvalError::UnsupportedOperand(json_kind(other))),
        }
    }
    Ok(out)
}
