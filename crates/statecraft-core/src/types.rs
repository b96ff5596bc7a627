// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance identities, lifecycle metadata, and snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Identity of a statechart instance: the (machine, version, instance) triple.
///
/// A machine is a named statechart family, a version is one sealed document of
/// that family, and the instance key identifies one live execution of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceId {
    /// Machine (statechart family) name.
    pub machine: String,
    /// Version key within the machine.
    pub version_key: String,
    /// Instance key within the version.
    pub instance_key: String,
}

impl InstanceId {
    /// Create an identity from its three components.
    pub fn new(
        machine: impl Into<String>,
        version_key: impl Into<String>,
        instance_key: impl Into<String>,
    ) -> Self {
        Self {
            machine: machine.into(),
            version_key: version_key.into(),
            instance_key: instance_key.into(),
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.machine, self.version_key, self.instance_key
        )
    }
}

/// Lifecycle flags kept in the instance metadata store.
///
/// `has_started` is set on the first successful start, `has_stopped` on an
/// intentional stop (and cleared again by a later explicit resume), and
/// `has_ended` once the interpreter reaches a final state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    /// The instance was started at least once.
    pub has_started: bool,
    /// The instance was intentionally stopped.
    pub has_stopped: bool,
    /// The interpreter reached a final state.
    pub has_ended: bool,
}

/// Opaque capture of interpreter state (active configuration + datamodel).
///
/// Snapshots are JSON values produced and consumed by the interpreter; the
/// runtime never inspects their structure, only compares them for dedup and
/// hands them back on resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(Value);

impl Snapshot {
    /// Wrap a JSON value as a snapshot.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Borrow the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Unwrap into the underlying JSON value.
    pub fn into_value(self) -> Value {
        self.0
    }

    /// SHA-256 hex digest of the canonical JSON encoding.
    ///
    /// `serde_json` maps are key-ordered, so equal values digest equally.
    /// Used for snapshot dedup and for snapshot-key suffixes.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(&self.0).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl From<Value> for Snapshot {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Key of a persisted snapshot.
///
/// Opaque to callers; the store guarantees that
/// [`Repository::list_snapshot_keys`](crate::repository::Repository::list_snapshot_keys)
/// returns keys in creation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotKey(
    /// Opaque key text assigned by the store.
    pub String,
);

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
