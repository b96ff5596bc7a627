// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bundled flat-chart interpreter.
//!
//! A deliberately small interpreter behind the [`InterpreterFactory`] seam so
//! the stock worker binary runs end to end. Documents are JSON:
//!
//! ```json
//! {
//!   "initial": "idle",
//!   "datamodel": { "count": 0 },
//!   "states": {
//!     "idle": {
//!       "entry": [ { "$type": "{https://statecraft.dev/engine}log",
//!                    "message": "entered idle" } ],
//!       "on": { "go": "running" }
//!     },
//!     "running": { "on": { "finish": { "target": "done",
//!                                      "actions": [] } } },
//!     "done": { "final": true }
//!   }
//! }
//! ```
//!
//! Action elements are attribute maps whose `$type` carries the
//! `{uri}localname` qualified action name; all other attributes are raw
//! strings handed to the action resolver. Snapshots capture the active state
//! and the datamodel. Hierarchy and parallel regions are not modeled here;
//! a full SCXML engine plugs in through the same factory seam.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use statecraft_core::Snapshot;

use crate::interpreter::{
    ActionInvocation, ActionSink, Event, Interpreter, InterpreterError, InterpreterFactory,
};

const TYPE_ATTRIBUTE: &str = "$type";

#[derive(Debug, Deserialize)]
struct ChartDoc {
    initial: String,
    #[serde(default)]
    datamodel: Map<String, Value>,
    states: BTreeMap<String, ChartState>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartState {
    #[serde(default)]
    entry: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    on: BTreeMap<String, TransitionSpec>,
    #[serde(default, rename = "final")]
    is_final: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TransitionSpec {
    Target(String),
    Full {
        target: String,
        #[serde(default)]
        actions: Vec<BTreeMap<String, String>>,
    },
}

impl TransitionSpec {
    fn target(&self) -> &str {
        match self {
            TransitionSpec::Target(target) => target,
            TransitionSpec::Full { target, .. } => target,
        }
    }

    fn actions(&self) -> &[BTreeMap<String, String>] {
        match self {
            TransitionSpec::Target(_) => &[],
            TransitionSpec::Full { actions, .. } => actions,
        }
    }
}

/// Flat-chart interpreter over the JSON document format above.
pub struct ChartInterpreter {
    doc: ChartDoc,
    current: String,
    datamodel: Map<String, Value>,
    started: bool,
    sink: ActionSink,
}

impl ChartInterpreter {
    fn new(
        document: &str,
        snapshot: Option<Snapshot>,
        sink: ActionSink,
    ) -> Result<Self, InterpreterError> {
        let doc: ChartDoc = serde_json::from_str(document)
            .map_err(|e| InterpreterError::InvalidDocument(e.to_string()))?;
        if !doc.states.contains_key(&doc.initial) {
            return Err(InterpreterError::InvalidDocument(format!(
                "initial state '{}' is not defined",
                doc.initial
            )));
        }

        let (current, datamodel, resumed) = match snapshot {
            Some(snapshot) => {
                let value = snapshot.into_value();
                let state = value
                    .get("configuration")
                    .and_then(|c| c.get(0))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        InterpreterError::InvalidSnapshot(
                            "missing active configuration".to_string(),
                        )
                    })?
                    .to_string();
                if !doc.states.contains_key(&state) {
                    return Err(InterpreterError::InvalidSnapshot(format!(
                        "state '{}' is not defined in the document",
                        state
                    )));
                }
                let datamodel = value
                    .get("datamodel")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                (state, datamodel, true)
            }
            None => (doc.initial.clone(), doc.datamodel.clone(), false),
        };

        Ok(Self {
            doc,
            current,
            datamodel,
            // Resumed charts do not replay entry actions on start
            started: resumed,
            sink,
        })
    }

    fn fire_actions(&self, elements: &[BTreeMap<String, String>], event: Option<&Event>) {
        for element in elements {
            let Some(qualified) = element.get(TYPE_ATTRIBUTE) else {
                continue;
            };
            (self.sink)(ActionInvocation {
                qualified: qualified.clone(),
                attributes: element.clone(),
                event: event.cloned(),
            });
        }
    }

    fn enter(&mut self, state: String, event: Option<&Event>) {
        self.current = state;
        if let Some(spec) = self.doc.states.get(&self.current) {
            let entry = spec.entry.clone();
            self.fire_actions(&entry, event);
        }
    }
}

impl Interpreter for ChartInterpreter {
    fn start(&mut self) -> Result<(), InterpreterError> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        let initial = self.current.clone();
        self.enter(initial, None);
        Ok(())
    }

    fn handle_event(&mut self, event: &Event) -> Result<bool, InterpreterError> {
        if !self.started {
            return Err(InterpreterError::NotStarted);
        }
        let Some(state) = self.doc.states.get(&self.current) else {
            return Ok(false);
        };
        let Some(transition) = state.on.get(&event.name) else {
            // No matching transition: the event is consumed silently
            return Ok(false);
        };
        let target = transition.target().to_string();
        if !self.doc.states.contains_key(&target) {
            return Ok(false);
        }
        let actions = transition.actions().to_vec();
        self.fire_actions(&actions, Some(event));
        self.enter(target, Some(event));
        Ok(true)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::new(json!({
            "configuration": [self.current],
            "datamodel": self.datamodel,
        }))
    }

    fn is_final(&self) -> bool {
        self.doc
            .states
            .get(&self.current)
            .map(|state| state.is_final)
            .unwrap_or(false)
    }

    fn datamodel(&self) -> Map<String, Value> {
        self.datamodel.clone()
    }
}

/// Factory for [`ChartInterpreter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ChartFactory;

impl InterpreterFactory for ChartFactory {
    fn build(
        &self,
        document: &str,
        snapshot: Option<Snapshot>,
        sink: ActionSink,
    ) -> Result<Box<dyn Interpreter>, InterpreterError> {
        Ok(Box::new(ChartInterpreter::new(document, snapshot, sink)?))
    }
}
