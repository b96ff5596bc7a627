// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The interpreter host.
//!
//! Wraps one interpreter together with its action pipeline (resolver →
//! dispatcher) and the snapshot cadence logic: every transition flags
//! "changed", and a fixed-interval tick turns the flag into at most one
//! snapshot push. Bursts of events therefore produce one eventual snapshot,
//! not one per event. Once the interpreter reaches a final state the tick
//! emits a single `finished` push instead.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use statecraft_core::{InstanceId, Snapshot};
use statecraft_protocol::{DispatcherConfig, Push};

use crate::actions::EngineActions;
use crate::dispatch::ActionDispatcher;
use crate::eval::{EvalContext, Evaluator, JinjaEvaluator};
use crate::interpreter::{
    ActionInvocation, ActionSink, Event, Interpreter, InterpreterError, InterpreterFactory,
};
use crate::resolver::resolve_args;
use crate::scheduler::Scheduler;

/// One hosted interpreter with its side-effect pipeline.
pub struct InterpreterHost {
    id: InstanceId,
    interpreter: Box<dyn Interpreter>,
    evaluator: Box<dyn Evaluator>,
    dispatcher: Arc<ActionDispatcher>,
    actions_rx: mpsc::UnboundedReceiver<ActionInvocation>,
    pusher: mpsc::UnboundedSender<Push>,
    started: bool,
    changed: bool,
    finished: bool,
}

impl InterpreterHost {
    /// Build a host around a freshly constructed interpreter.
    ///
    /// `injector` is the channel through which the scheduler and the
    /// dispatcher raise events back into this instance; the worker loop owns
    /// the receiving side. `pusher` carries unsolicited worker→runtime
    /// notifications.
    pub fn build(
        factory: &dyn InterpreterFactory,
        document: &str,
        snapshot: Option<Snapshot>,
        id: InstanceId,
        dispatcher_config: DispatcherConfig,
        injector: mpsc::UnboundedSender<Event>,
        pusher: mpsc::UnboundedSender<Push>,
    ) -> Result<Self, InterpreterError> {
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        let sink: ActionSink = Arc::new(move |invocation| {
            let _ = actions_tx.send(invocation);
        });
        let interpreter = factory.build(document, snapshot, sink)?;

        let scheduler = Scheduler::new(injector.clone());
        let engine_actions = EngineActions::new(id.clone(), scheduler, pusher.clone());
        let dispatcher = Arc::new(ActionDispatcher::new(
            id.clone(),
            dispatcher_config,
            engine_actions,
            injector,
        ));

        Ok(Self {
            id,
            interpreter,
            evaluator: Box::new(JinjaEvaluator::new()),
            dispatcher,
            actions_rx,
            pusher,
            started: false,
            changed: false,
            finished: false,
        })
    }

    /// Whether `start` has completed.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Start the interpreter and run the initial entry actions.
    pub fn start(&mut self) -> Result<(), InterpreterError> {
        self.interpreter.start()?;
        self.started = true;
        self.changed = true;
        self.drain_actions();
        Ok(())
    }

    /// Apply one event within the interpreter's step semantics.
    pub fn apply_event(&mut self, event: &Event) -> Result<(), InterpreterError> {
        if !self.started {
            return Err(InterpreterError::NotStarted);
        }
        let stepped = self.interpreter.handle_event(event)?;
        if stepped {
            self.changed = true;
        }
        self.drain_actions();
        Ok(())
    }

    /// Capture the current interpreter state.
    pub fn snapshot(&self) -> Snapshot {
        self.interpreter.snapshot()
    }

    /// Replace the external dispatch target.
    pub fn swap_dispatcher(&self, config: DispatcherConfig) {
        self.dispatcher.swap(config);
    }

    /// One snapshot-cadence tick.
    ///
    /// Emits `finished` once when the interpreter is in a final state, else
    /// one `snapshot` push if anything changed since the last tick.
    pub fn tick(&mut self) {
        if !self.started || self.finished {
            return;
        }
        if self.interpreter.is_final() {
            self.finished = true;
            // Flush the terminal state before announcing the finish so the
            // runtime persists it
            if self.changed {
                self.changed = false;
                let _ = self.pusher.send(Push::Snapshot {
                    snapshot: self.interpreter.snapshot(),
                });
            }
            let _ = self.pusher.send(Push::Finished);
            return;
        }
        if self.changed {
            self.changed = false;
            let _ = self.pusher.send(Push::Snapshot {
                snapshot: self.interpreter.snapshot(),
            });
        }
    }

    /// Process every action invocation queued by the last interpreter step.
    fn drain_actions(&mut self) {
        while let Ok(invocation) = self.actions_rx.try_recv() {
            self.process_invocation(invocation);
        }
    }

    fn process_invocation(&self, invocation: ActionInvocation) {
        let datamodel = self.interpreter.datamodel();
        let ctx = EvalContext {
            event: invocation.event.as_ref(),
            datamodel: &datamodel,
        };
        match resolve_args(&invocation.attributes, &ctx, self.evaluator.as_ref()) {
            Ok(args) => self.dispatcher.dispatch(&invocation.qualified, args),
            Err(e) => {
                // Abandon the action; the interpreter keeps running
                warn!(
                    instance = %self.id,
                    action = %invocation.qualified,
                    "action abandoned: {}",
                    e
                );
            }
        }
    }
}
