//! Edge-condition interpreter.
//!
//! Conditions are captured by the compiler as uninterpreted source text
//! (`x.ok`, `!(y.done)`, `retries < 3`). At run time they are parsed with
//! the dialect's expression grammar and evaluated against the current
//! context and the source node's result: an identifier resolves to a
//! context key when one exists, otherwise to the result itself (so the
//! binding introduced at the fork's await reads that node's output).

use serde_json::Value;
use thiserror::Error;

use crate::diagnostics::Diagnostics;
use crate::lang::ast::{BinaryOp, Expression, UnaryOp};
use crate::lang::lexer::Lexer;
use crate::lang::parser::Parser;
use crate::lang::token::SourceFile;

#[derive(Debug, Error, PartialEq)]
pub enum ConditionError {
    #[error("condition '{0}' does not parse")]
    Parse(String),

    #[error("condition uses unsupported syntax: {0}")]
    Unsupported(String),
}

/// Evaluate a condition to a boolean.
pub fn evaluate(text: &str, context: &crate::runtime::ExecutionContext, result: &Value) -> Result<bool, ConditionError> {
    Ok(truthy(&evaluate_value(text, context, result)?))
}

/// Evaluate an expression (also used by the loop controller for its
/// iterable) to a JSON value.
pub fn evaluate_value(
    text: &str,
    context: &crate::runtime::ExecutionContext,
    result: &Value,
) -> Result<Value, ConditionError> {
    let file = SourceFile::new("<condition>", text);
    let mut diagnostics = Diagnostics::new();
    let tokens = Lexer::new(&file).tokenize(&mut diagnostics);
    let mut parser = Parser::new(&file, tokens, &mut diagnostics);
    let expr = parser
        .expression()
        .map_err(|_| ConditionError::Parse(text.to_string()))?;
    if diagnostics.has_errors() {
        return Err(ConditionError::Parse(text.to_string()));
    }
    eval(&expr, context, result)
}

fn eval(
    expr: &Expression,
    context: &crate::runtime::ExecutionContext,
    result: &Value,
) -> Result<Value, ConditionError> {
    match expr {
        Expression::Ident { name, .. } => Ok(context
            .get(name)
            .cloned()
            .unwrap_or_else(|| result.clone())),
        Expression::Number { raw, .. } => {
            let cleaned: String = raw.chars().filter(|c| *c != '_').collect();
            if let Ok(int) = cleaned.parse::<i64>() {
                return Ok(Value::Number(int.into()));
            }
            cleaned
                .parse::<f64>()
                .map(number)
                .map_err(|_| ConditionError::Unsupported(format!("number '{}'", raw)))
        }
        Expression::Str { value, .. } => Ok(Value::String(value.clone())),
        Expression::Bool { value, .. } => Ok(Value::Bool(*value)),
        Expression::Null { .. } => Ok(Value::Null),
        Expression::Paren { inner, .. } => eval(inner, context, result),
        Expression::Member {
            object, property, ..
        } => {
            let object = eval(object, context, result)?;
            Ok(object.get(property).cloned().unwrap_or(Value::Null))
        }
        Expression::Unary { op, operand, .. } => {
            let value = eval(operand, context, result)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => match as_number(&value) {
                    Some(n) => Ok(number(-n)),
                    None => Ok(Value::Null),
                },
            }
        }
        Expression::Binary {
            op, left, right, ..
        } => {
            // Short-circuit logical operators.
            match op {
                BinaryOp::And => {
                    let left = eval(left, context, result)?;
                    if !truthy(&left) {
                        return Ok(Value::Bool(false));
                    }
                    let right = eval(right, context, result)?;
                    return Ok(Value::Bool(truthy(&right)));
                }
                BinaryOp::Or => {
                    let left = eval(left, context, result)?;
                    if truthy(&left) {
                        return Ok(Value::Bool(true));
                    }
                    let right = eval(right, context, result)?;
                    return Ok(Value::Bool(truthy(&right)));
                }
                _ => {}
            }

            let lhs = eval(left, context, result)?;
            let rhs = eval(right, context, result)?;
            Ok(match op {
                BinaryOp::Eq | BinaryOp::StrictEq => Value::Bool(json_eq(&lhs, &rhs)),
                BinaryOp::NotEq | BinaryOp::StrictNotEq => Value::Bool(!json_eq(&lhs, &rhs)),
                BinaryOp::Lt => compare(&lhs, &rhs, |a, b| a < b),
                BinaryOp::Gt => compare(&lhs, &rhs, |a, b| a > b),
                BinaryOp::Le => compare(&lhs, &rhs, |a, b| a <= b),
                BinaryOp::Ge => compare(&lhs, &rhs, |a, b| a >= b),
                BinaryOp::Add => match (&lhs, &rhs) {
                    (Value::String(a), Value::String(b)) => {
                        Value::String(format!("{}{}", a, b))
                    }
                    _ => arithmetic(&lhs, &rhs, |a, b| a + b),
                },
                BinaryOp::Sub => arithmetic(&lhs, &rhs, |a, b| a - b),
                BinaryOp::Mul => arithmetic(&lhs, &rhs, |a, b| a * b),
                BinaryOp::Div => arithmetic(&lhs, &rhs, |a, b| a / b),
                BinaryOp::Rem => arithmetic(&lhs, &rhs, |a, b| a % b),
                BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
            })
        }
        Expression::Array { elements, .. } => {
            let values: Result<Vec<Value>, ConditionError> = elements
                .iter()
                .map(|e| eval(e, context, result))
                .collect();
            Ok(Value::Array(values?))
        }
        Expression::Object { properties, .. } => {
            let mut map = serde_json::Map::new();
            for (key, value) in properties {
                map.insert(key.clone(), eval(value, context, result)?);
            }
            Ok(Value::Object(map))
        }
        Expression::Call { .. } | Expression::Await { .. } => Err(
            ConditionError::Unsupported("calls are not allowed in conditions".into()),
        ),
    }
}

/// JavaScript-flavoured truthiness over JSON values.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        Value::Bool(true) => Some(1.0),
        Value::Bool(false) => Some(0.0),
        _ => None,
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Structural equality, with integer/float widths unified for numbers.
fn json_eq(lhs: &Value, rhs: &Value) -> bool {
    if lhs.is_number() && rhs.is_number() {
        return match (as_number(lhs), as_number(rhs)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
    }
    lhs == rhs
}

fn compare(lhs: &Value, rhs: &Value, op: fn(f64, f64) -> bool) -> Value {
    match (as_number(lhs), as_number(rhs)) {
        (Some(a), Some(b)) => Value::Bool(op(a, b)),
        _ => Value::Bool(false),
    }
}

fn arithmetic(lhs: &Value, rhs: &Value, op: fn(f64, f64) -> f64) -> Value {
    match (as_number(lhs), as_number(rhs)) {
        (Some(a), Some(b)) => number(op(a, b)),
        _ => Value::Null,
    }
}
