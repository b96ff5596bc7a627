// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Repository collaborators for the engine.
//!
//! This module defines the boundary to the three external stores the engine
//! consumes: the sealed statechart document store, the instance metadata
//! store, and the append-only snapshot store. Durable backends (SQL, git)
//! live outside this workspace; [`MemoryRepository`] is the reference
//! implementation for tests and single-process embedding.

pub mod memory;

pub use self::memory::MemoryRepository;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{InstanceId, InstanceInfo, Snapshot, SnapshotKey};

/// Storage boundary consumed by the engine registry and instance runtimes.
///
/// Snapshot listings are ordered by creation time. The snapshot store is only
/// ever written by the owning instance's runtime, so implementations need no
/// cross-instance write coordination.
#[allow(missing_docs)]
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_version_document(&self, machine: &str, version_key: &str) -> Result<String>;

    async fn is_version_sealed(&self, machine: &str, version_key: &str) -> Result<bool>;

    async fn list_machines(&self) -> Result<Vec<String>>;

    async fn list_versions(&self, machine: &str) -> Result<Vec<String>>;

    async fn list_instances(&self, machine: &str, version_key: &str) -> Result<Vec<String>>;

    /// Create instance metadata and return the new instance key.
    async fn create_instance(&self, machine: &str, version_key: &str) -> Result<String>;

    async fn get_instance_info(&self, id: &InstanceId) -> Result<InstanceInfo>;

    async fn set_instance_info(&self, id: &InstanceId, info: InstanceInfo) -> Result<()>;

    /// Append a snapshot and return its key.
    async fn add_snapshot(&self, id: &InstanceId, snapshot: &Snapshot) -> Result<SnapshotKey>;

    /// Snapshot keys for an instance, in creation order.
    async fn list_snapshot_keys(&self, id: &InstanceId) -> Result<Vec<SnapshotKey>>;

    async fn get_snapshot(&self, id: &InstanceId, key: &SnapshotKey) -> Result<Snapshot>;

    /// The most recently persisted snapshot, if any.
    async fn latest_snapshot(&self, id: &InstanceId) -> Result<Option<Snapshot>> {
        let keys = self.list_snapshot_keys(id).await?;
        match keys.last() {
            Some(key) => Ok(Some(self.get_snapshot(id, key).await?)),
            None => Ok(None),
        }
    }
}
