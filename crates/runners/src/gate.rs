//! Built-in [`GateEvaluator`] implementations.
//!
//! Neither evaluator is an expression language. [`ContextGateEvaluator`]
//! understands literals, negation, a single equality test, and path
//! truthiness against the run context; [`CommandGateEvaluator`] hands the
//! expression to a [`CommandRunner`] and reads the exit code.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::path::{lookup, truthy};
use crate::{CommandRunner, GateError, GateEvaluator};

/// Evaluates gates against the JSON view of the run context.
///
/// Accepted forms (optionally wrapped in `${{ ... }}`):
/// - `true` / `false`
/// - `!<expr>`
/// - `<operand> == <operand>` and `<operand> != <operand>`, where an operand
///   is a quoted string, a number, `true`/`false`/`null`, or a dotted path
/// - a bare dotted path, tested for truthiness (missing paths are false)
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextGateEvaluator;

impl ContextGateEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn eval(expression: &str, view: &Value) -> Result<bool, String> {
        let expr = strip_wrapper(expression.trim());
        if expr.is_empty() {
            return Err("empty expression".into());
        }

        if let Some(rest) = expr.strip_prefix('!') {
            if !rest.starts_with('=') {
                return Self::eval(rest, view).map(|b| !b);
            }
        }

        if let Some((lhs, rhs)) = expr.split_once("!=") {
            return Ok(operand(lhs, view)? != operand(rhs, view)?);
        }
        if let Some((lhs, rhs)) = expr.split_once("==") {
            return Ok(operand(lhs, view)? == operand(rhs, view)?);
        }

        match operand(expr, view)? {
            Value::Bool(b) => Ok(b),
            other => Ok(truthy(&other)),
        }
    }
}

#[async_trait]
impl GateEvaluator for ContextGateEvaluator {
    async fn evaluate(&self, expression: &str, view: &Value) -> Result<bool, GateError> {
        Self::eval(expression, view).map_err(|reason| GateError::new(expression, reason))
    }
}

fn strip_wrapper(expr: &str) -> &str {
    expr.strip_prefix("${{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(expr)
}

fn operand(raw: &str, view: &Value) -> Result<Value, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("missing operand".into());
    }

    for quote in ['\'', '"'] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return Ok(Value::String(raw[1..raw.len() - 1].to_string()));
        }
    }

    match raw {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }

    if let Ok(n) = raw.parse::<i64>() {
        return Ok(Value::from(n));
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Ok(Value::from(f));
    }

    let is_path = raw
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !is_path {
        return Err(format!("unsupported operand '{raw}'"));
    }

    Ok(lookup(view, raw).cloned().unwrap_or(Value::Null))
}

/// Runs each gate as a command; exit status 0 means the gate passes.
///
/// Matches gates written as shell tests, e.g. `test -f package.json`.
#[derive(Clone)]
pub struct CommandGateEvaluator {
    runner: Arc<dyn CommandRunner>,
}

impl CommandGateEvaluator {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl GateEvaluator for CommandGateEvaluator {
    async fn evaluate(&self, expression: &str, _view: &Value) -> Result<bool, GateError> {
        let output = self
            .runner
            .run(expression, &BTreeMap::new())
            .await
            .map_err(|e| GateError::new(expression, e.to_string()))?;
        Ok(output.success())
    }
}
