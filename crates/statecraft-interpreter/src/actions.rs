// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The reserved engine-action table.
//!
//! Actions whose namespace matches the engine namespace resolve here instead
//! of being forwarded externally. `schedule`, `unschedule`, and `log` are
//! handled inside the worker; `spawn-instance`, `start-instance`,
//! `stop-instance`, and `send-event` are relayed to the owning engine as
//! pushes, which raises the caller-specified `raise` event back into this
//! instance once the operation completes.
//!
//! Argument errors are logged and drop the action; a misconfigured action
//! never halts the machine.

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use statecraft_core::{EngineError, InstanceId};
use statecraft_protocol::Push;

use crate::scheduler::{Scheduler, parse_deadline};

/// Reserved local action names handled by the table.
pub const ENGINE_ACTION_NAMES: &[&str] = &[
    "schedule",
    "unschedule",
    "log",
    "spawn-instance",
    "start-instance",
    "stop-instance",
    "send-event",
];

/// Executes reserved engine actions for one instance.
pub struct EngineActions {
    id: InstanceId,
    scheduler: Scheduler,
    pusher: mpsc::UnboundedSender<Push>,
}

impl EngineActions {
    /// Create the table for `id`, firing timers through `scheduler` and
    /// relaying registry operations through `pusher`.
    pub fn new(
        id: InstanceId,
        scheduler: Scheduler,
        pusher: mpsc::UnboundedSender<Push>,
    ) -> Self {
        Self {
            id,
            scheduler,
            pusher,
        }
    }

    /// Execute a reserved action. Unknown names are silently ignored.
    pub fn execute(&self, action: &str, args: &Map<String, Value>) {
        match action {
            "schedule" => self.schedule(args),
            "unschedule" => self.unschedule(args),
            "log" => self.log(args),
            "spawn-instance" => self.spawn_instance(args),
            "start-instance" => self.start_instance(args),
            "stop-instance" => self.stop_instance(args),
            "send-event" => self.send_event(args),
            other => {
                debug!(instance = %self.id, action = other, "unknown engine action ignored");
            }
        }
    }

    /// `<schedule raise="tick" exprDate="..." job="j1"/>`
    ///
    /// Registers a timer that raises `raise` into this instance when
    /// `date`/`when` elapses. A `job` id makes it cancelable.
    fn schedule(&self, args: &Map<String, Value>) {
        let Some(raise) = self.required_str(args, "schedule", "raise") else {
            return;
        };
        let deadline = args
            .get("date")
            .or_else(|| args.get("when"))
            .and_then(parse_deadline);
        let Some(fire_at) = deadline else {
            self.missing("schedule", "date");
            return;
        };
        let job = args
            .get("job")
            .and_then(Value::as_str)
            .map(str::to_string);
        let data = args.get("data").cloned().unwrap_or(Value::Null);
        self.scheduler
            .schedule(job, fire_at, raise.to_string(), data);
    }

    /// `<unschedule job="j1"/>`
    fn unschedule(&self, args: &Map<String, Value>) {
        let Some(job) = self.required_str(args, "unschedule", "job") else {
            return;
        };
        self.scheduler.cancel(job);
    }

    /// `<log message="user %s logged in" exprData="[_event.data.user]"/>`
    fn log(&self, args: &Map<String, Value>) {
        let Some(message) = self.required_str(args, "log", "message") else {
            return;
        };
        let data: Vec<Value> = args
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let line = format_printf(message, &data);
        debug!(instance = %self.id, "{}", line);
        self.push(Push::Log { message: line });
    }

    fn spawn_instance(&self, args: &Map<String, Value>) {
        let Some(machine) = self.required_str(args, "spawn-instance", "machine") else {
            return;
        };
        let Some(version_key) = self.required_str(args, "spawn-instance", "versionKey") else {
            return;
        };
        self.push(Push::AddInstance {
            machine: machine.to_string(),
            version_key: version_key.to_string(),
            raise: self.raise_arg(args),
        });
    }

    fn start_instance(&self, args: &Map<String, Value>) {
        let Some((machine, version_key, instance_key)) = self.target(args, "start-instance")
        else {
            return;
        };
        self.push(Push::StartInstance {
            machine,
            version_key,
            instance_key,
            raise: self.raise_arg(args),
        });
    }

    fn stop_instance(&self, args: &Map<String, Value>) {
        let Some((machine, version_key, instance_key)) = self.target(args, "stop-instance")
        else {
            return;
        };
        self.push(Push::StopInstance {
            machine,
            version_key,
            instance_key,
            raise: self.raise_arg(args),
        });
    }

    /// `<send-event machine="m" versionKey="v" instanceKey="i" name="go"/>`
    ///
    /// Delivers `name` to the target instance; `raise` (optional) is the
    /// completion event raised back into this instance.
    fn send_event(&self, args: &Map<String, Value>) {
        let Some((machine, version_key, instance_key)) = self.target(args, "send-event") else {
            return;
        };
        let Some(name) = self.required_str(args, "send-event", "name") else {
            return;
        };
        self.push(Push::SendEvent {
            machine,
            version_key,
            instance_key,
            name: name.to_string(),
            data: args.get("data").cloned().unwrap_or(Value::Null),
            raise: self.raise_arg(args),
        });
    }

    fn target(&self, args: &Map<String, Value>, action: &str) -> Option<(String, String, String)> {
        let machine = self.required_str(args, action, "machine")?.to_string();
        let version_key = self.required_str(args, action, "versionKey")?.to_string();
        let instance_key = self.required_str(args, action, "instanceKey")?.to_string();
        Some((machine, version_key, instance_key))
    }

    fn raise_arg(&self, args: &Map<String, Value>) -> Option<String> {
        args.get("raise").and_then(Value::as_str).map(str::to_string)
    }

    fn required_str<'a>(
        &self,
        args: &'a Map<String, Value>,
        action: &str,
        key: &str,
    ) -> Option<&'a str> {
        let value = args.get(key).and_then(Value::as_str);
        if value.is_none() {
            self.missing(action, key);
        }
        value
    }

    fn missing(&self, action: &str, argument: &str) {
        let err = EngineError::MissingArgument {
            action: action.to_string(),
            argument: argument.to_string(),
        };
        warn!(instance = %self.id, code = err.error_code(), "{}", err);
    }

    fn push(&self, push: Push) {
        if self.pusher.send(push).is_err() {
            warn!(instance = %self.id, "push channel closed, dropping engine action");
        }
    }
}

/// Minimal printf-style formatting: `%s` and `%d` consume the next datum,
/// `%%` is a literal percent. Everything else passes through unchanged.
fn format_printf(fmt: &str, data: &[Value]) -> String {
    let mut out = String::with_capacity(fmt.len());
    let mut next = 0usize;
    let mut chars = fmt.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        match chars.peek() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some('s') | Some('d') => {
                chars.next();
                match data.get(next) {
                    Some(Value::String(text)) => out.push_str(text),
                    Some(value) => out.push_str(&value.to_string()),
                    None => out.push_str("%?"),
                }
                next += 1;
            }
            _ => out.push('%'),
        }
    }
    out
}
