// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sandboxed expression evaluation for `expr*` action attributes.
//!
//! The evaluator is a narrow seam: one method, string expression in, JSON
//! value out. The stock implementation compiles minijinja expressions with
//! the current event bound as `_event` and the datamodel fields bound at the
//! top level. Expressions have no access to the process environment.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::interpreter::Event;

/// Evaluation context: the triggering event (if any) and the datamodel.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Event bound as `_event` in expressions.
    pub event: Option<&'a Event>,
    /// Datamodel fields, bound by name.
    pub datamodel: &'a Map<String, Value>,
}

/// Errors from expression evaluation.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("failed to compile expression '{expr}': {reason}")]
    Compile { expr: String, reason: String },

    #[error("failed to evaluate expression '{expr}': {reason}")]
    Eval { expr: String, reason: String },
}

/// Expression evaluator seam.
pub trait Evaluator: Send + Sync {
    /// Evaluate `expr` against `ctx`, returning a JSON value.
    fn eval(&self, expr: &str, ctx: &EvalContext<'_>) -> Result<Value, EvalError>;
}

/// Minijinja-backed [`Evaluator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JinjaEvaluator;

impl JinjaEvaluator {
    /// Create the evaluator.
    pub fn new() -> Self {
        Self
    }

    fn context(ctx: &EvalContext<'_>) -> minijinja::Value {
        let mut scope = ctx.datamodel.clone();
        let event = match ctx.event {
            Some(event) => serde_json::to_value(event).unwrap_or(Value::Null),
            None => Value::Null,
        };
        scope.insert("_event".to_string(), event);
        minijinja::Value::from_serialize(&scope)
    }
}

impl Evaluator for JinjaEvaluator {
    fn eval(&self, expr: &str, ctx: &EvalContext<'_>) -> Result<Value, EvalError> {
        let env = minijinja::Environment::new();
        let compiled = env.compile_expression(expr).map_err(|e| EvalError::Compile {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;
        let result = compiled
            .eval(Self::context(ctx))
            .map_err(|e| EvalError::Eval {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
        serde_json::to_value(&result).map_err(|e| EvalError::Eval {
            expr: expr.to_string(),
            reason: e.to_string(),
        })
    }
}
