// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Action argument resolution.
//!
//! Raw action-element attributes become a clean argument map:
//!
//! - keys starting with a reserved marker (`$`) are dropped (`$type` carries
//!   the qualified action name and never reaches the arguments),
//! - keys prefixed `expr` are evaluated as expressions; the result lands
//!   under the stripped key with its first character lowercased
//!   (`exprDate="..."` becomes `date`),
//! - every other key passes through as a literal string.
//!
//! Any expression failure abandons the whole action: the caller logs and
//! dispatches nothing, and the interpreter keeps running.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::eval::{EvalContext, EvalError, Evaluator};

const RESERVED_MARKER: char = '$';
const EXPR_PREFIX: &str = "expr";

/// Resolve raw attributes into an argument map.
///
/// Returns `Err` when any `expr*` attribute fails to evaluate; the action
/// must then be abandoned.
pub fn resolve_args(
    attributes: &BTreeMap<String, String>,
    ctx: &EvalContext<'_>,
    evaluator: &dyn Evaluator,
) -> Result<Map<String, Value>, EvalError> {
    let mut args = Map::new();
    for (key, raw) in attributes {
        if key.starts_with(RESERVED_MARKER) {
            continue;
        }
        if let Some(rest) = key.strip_prefix(EXPR_PREFIX) {
            if rest.is_empty() {
                // A bare "expr" attribute has no derivable argument name
                tracing::debug!(key, "dropping expr attribute with empty key");
                continue;
            }
            let value = evaluator.eval(raw, ctx)?;
            args.insert(lower_first(rest), value);
        } else {
            args.insert(key.clone(), Value::String(raw.clone()));
        }
    }
    Ok(args)
}

fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
