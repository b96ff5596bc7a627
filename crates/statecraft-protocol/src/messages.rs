// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message envelopes carried in frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use statecraft_core::{InstanceId, Snapshot};

/// Target for external action dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherConfig {
    /// Base URL of the external action service; `None` disables dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Bearer token sent in the `Authorization` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl DispatcherConfig {
    /// A dispatcher target with URL and optional token.
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: Some(url.into()),
            token,
        }
    }
}

/// Runtime-initiated commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Command {
    /// Create the interpreter from the document, optionally restoring a snapshot.
    #[serde(rename_all = "camelCase")]
    Init {
        /// Statechart document text.
        document: String,
        /// Snapshot to restore, if resuming.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<Snapshot>,
        /// External action-dispatch target.
        #[serde(default)]
        dispatcher: DispatcherConfig,
        /// Identity of the hosted instance (for logs and engine actions).
        id: InstanceId,
        /// Interval of the snapshot/finished tick, in milliseconds.
        snapshot_interval_ms: u64,
    },
    /// Start the interpreter. Must follow a successful `Init`.
    Start,
    /// Deliver an external event to the interpreter.
    Event {
        /// Event name.
        name: String,
        /// Event payload.
        #[serde(default)]
        data: Value,
    },
    /// Request a snapshot of the current interpreter state.
    GetSnapshot,
    /// Replace the external action-dispatch target.
    SwapDispatcher {
        /// New dispatch target.
        dispatcher: DispatcherConfig,
    },
}

impl Command {
    /// Short name of the command, for logs and timeout errors.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Init { .. } => "init",
            Command::Start => "start",
            Command::Event { .. } => "event",
            Command::GetSnapshot => "getSnapshot",
            Command::SwapDispatcher { .. } => "swapDispatcher",
        }
    }
}

/// A command tagged with its correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    /// Correlation id echoed by the reply.
    pub correlation_id: u64,
    /// The command itself.
    #[serde(flatten)]
    pub command: Command,
}

/// Worker reply to one command.
///
/// Exactly one reply is sent per command, carrying the same correlation id.
/// A reply either succeeds (optionally with a snapshot payload) or carries an
/// error message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    /// Correlation id of the command this answers.
    pub correlation_id: u64,
    /// Error message, if the command failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Snapshot payload for `getSnapshot`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
}

impl Reply {
    /// Successful reply without payload.
    pub fn ack(correlation_id: u64) -> Self {
        Self {
            correlation_id,
            error: None,
            snapshot: None,
        }
    }

    /// Failed reply with an error message.
    pub fn err(correlation_id: u64, message: impl Into<String>) -> Self {
        Self {
            correlation_id,
            error: Some(message.into()),
            snapshot: None,
        }
    }

    /// Successful reply carrying a snapshot.
    pub fn with_snapshot(correlation_id: u64, snapshot: Snapshot) -> Self {
        Self {
            correlation_id,
            error: None,
            snapshot: Some(snapshot),
        }
    }

    /// Convert into a result: `Ok(snapshot payload)` or `Err(message)`.
    pub fn into_result(self) -> Result<Option<Snapshot>, String> {
        match self.error {
            Some(message) => Err(message),
            None => Ok(self.snapshot),
        }
    }
}

/// Unsolicited worker notifications.
///
/// Pushes are fire-and-forget: the runtime reacts to them but never replies,
/// and they carry no correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Push {
    /// Fresh interpreter snapshot (emitted by the snapshot tick).
    Snapshot {
        /// The captured state.
        snapshot: Snapshot,
    },
    /// The interpreter reached a final state.
    Finished,
    /// A `log` engine action fired.
    Log {
        /// Formatted log line.
        message: String,
    },
    /// Request to create a new instance of another machine version.
    #[serde(rename_all = "camelCase")]
    AddInstance {
        /// Target machine.
        machine: String,
        /// Target version key.
        version_key: String,
        /// Event raised back into the requesting instance on completion.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raise: Option<String>,
    },
    /// Request to start an existing instance.
    #[serde(rename_all = "camelCase")]
    StartInstance {
        /// Target machine.
        machine: String,
        /// Target version key.
        version_key: String,
        /// Target instance key.
        instance_key: String,
        /// Event raised back into the requesting instance on completion.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raise: Option<String>,
    },
    /// Request to stop a running instance.
    #[serde(rename_all = "camelCase")]
    StopInstance {
        /// Target machine.
        machine: String,
        /// Target version key.
        version_key: String,
        /// Target instance key.
        instance_key: String,
        /// Event raised back into the requesting instance on completion.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raise: Option<String>,
    },
    /// Request to deliver an event to another instance.
    #[serde(rename_all = "camelCase")]
    SendEvent {
        /// Target machine.
        machine: String,
        /// Target version key.
        version_key: String,
        /// Target instance key.
        instance_key: String,
        /// Event name delivered to the target instance.
        name: String,
        /// Event payload.
        #[serde(default)]
        data: Value,
        /// Event raised back into the requesting instance on completion.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raise: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_envelope_wire_shape() {
        let envelope = CommandEnvelope {
            correlation_id: 42,
            command: Command::Event {
                name: "go".into(),
                data: json!({"speed": 2}),
            },
        };
        let encoded = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            encoded,
            json!({"correlationId": 42, "cmd": "event", "name": "go", "data": {"speed": 2}})
        );

        let decoded: CommandEnvelope = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.correlation_id, 42);
        assert_eq!(decoded.command.name(), "event");
    }

    #[test]
    fn test_init_defaults() {
        let decoded: CommandEnvelope = serde_json::from_value(json!({
            "correlationId": 1,
            "cmd": "init",
            "document": "{}",
            "id": {"machine": "m", "versionKey": "v", "instanceKey": "i"},
            "snapshotIntervalMs": 1000
        }))
        .unwrap();
        match decoded.command {
            Command::Init {
                snapshot,
                dispatcher,
                ..
            } => {
                assert!(snapshot.is_none());
                assert_eq!(dispatcher, DispatcherConfig::default());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_reply_into_result() {
        assert_eq!(Reply::ack(1).into_result(), Ok(None));
        assert_eq!(
            Reply::err(2, "boom").into_result(),
            Err("boom".to_string())
        );
        let snap = Snapshot::new(json!({"state": "a"}));
        assert_eq!(
            Reply::with_snapshot(3, snap.clone()).into_result(),
            Ok(Some(snap))
        );
    }

    #[test]
    fn test_push_tags() {
        let push = Push::Finished;
        assert_eq!(
            serde_json::to_value(&push).unwrap(),
            json!({"action": "finished"})
        );

        let push = Push::AddInstance {
            machine: "child".into(),
            version_key: "v1".into(),
            raise: Some("spawned".into()),
        };
        let encoded = serde_json::to_value(&push).unwrap();
        assert_eq!(encoded["action"], "addInstance");
        assert_eq!(encoded["versionKey"], "v1");
    }
}
