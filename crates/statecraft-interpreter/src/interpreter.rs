// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The black-box interpreter seam.
//!
//! The statechart interpretation algorithm (microstep/macrostep semantics,
//! SCXML grammar) is an external concern. The host only needs the small
//! surface below: start, feed events, capture snapshots, and observe final
//! states. Custom executable content flows out through the [`ActionSink`]
//! hook, the interpreter's sole side-effect channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use statecraft_core::Snapshot;

/// An event delivered to (or raised within) a statechart instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name.
    pub name: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

impl Event {
    /// Create an event from name and payload.
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// A custom-action element surfaced by the interpreter.
///
/// `qualified` uses the `{uri}localname` convention; `attributes` are the raw
/// attribute strings of the element; `event` is the event being processed if
/// the action sits on a transition, `None` for entry actions.
#[derive(Debug, Clone)]
pub struct ActionInvocation {
    pub qualified: String,
    pub attributes: BTreeMap<String, String>,
    pub event: Option<Event>,
}

/// The postMessage-style hook through which the interpreter surfaces custom
/// actions. Invocations are queued and processed after the step completes.
pub type ActionSink = Arc<dyn Fn(ActionInvocation) + Send + Sync>;

/// Errors from interpreter construction and stepping.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("invalid statechart document: {0}")]
    InvalidDocument(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("interpreter has not started")]
    NotStarted,
}

/// A live statechart interpreter hosting one instance.
pub trait Interpreter: Send {
    /// Enter the initial configuration (or the restored one when built from a
    /// snapshot) and run its entry actions.
    fn start(&mut self) -> Result<(), InterpreterError>;

    /// Apply one external event within the interpreter's step semantics.
    ///
    /// Returns whether the event caused a transition. Events that match no
    /// transition are ignored (returning `false`), not errors.
    fn handle_event(&mut self, event: &Event) -> Result<bool, InterpreterError>;

    /// Capture the current state (active configuration + datamodel).
    fn snapshot(&self) -> Snapshot;

    /// Whether the interpreter has reached a final state.
    fn is_final(&self) -> bool;

    /// Current datamodel values, for expression-evaluation context.
    fn datamodel(&self) -> serde_json::Map<String, Value>;
}

/// Builds interpreters from statechart documents.
///
/// The worker binary picks the concrete engine at compile time; the stock
/// binary uses [`crate::chart::ChartFactory`].
pub trait InterpreterFactory: Send + Sync + 'static {
    /// Build an interpreter for `document`, optionally restoring `snapshot`.
    fn build(
        &self,
        document: &str,
        snapshot: Option<Snapshot>,
        sink: ActionSink,
    ) -> Result<Box<dyn Interpreter>, InterpreterError>;
}
