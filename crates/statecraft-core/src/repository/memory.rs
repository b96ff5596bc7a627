// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory repository backend.
//!
//! Keeps machines, versions, instance metadata, and snapshots in process
//! memory behind a single `RwLock`. Used by tests and by embedders that do
//! not need durable storage.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::types::{InstanceId, InstanceInfo, Snapshot, SnapshotKey};

use super::Repository;

#[derive(Debug, Default)]
struct VersionEntry {
    document: String,
    sealed: bool,
    instances: HashMap<String, InstanceEntry>,
}

#[derive(Debug, Default)]
struct InstanceEntry {
    info: InstanceInfo,
    snapshots: Vec<(SnapshotKey, Snapshot)>,
    next_seq: u64,
}

/// In-memory [`Repository`] implementation.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    machines: RwLock<HashMap<String, HashMap<String, VersionEntry>>>,
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a machine name (idempotent).
    pub async fn insert_machine(&self, machine: &str) {
        self.machines
            .write()
            .await
            .entry(machine.to_string())
            .or_default();
    }

    /// Register a version document under a machine (unsealed).
    pub async fn insert_version(&self, machine: &str, version_key: &str, document: &str) {
        let mut machines = self.machines.write().await;
        let versions = machines.entry(machine.to_string()).or_default();
        versions.insert(
            version_key.to_string(),
            VersionEntry {
                document: document.to_string(),
                sealed: false,
                instances: HashMap::new(),
            },
        );
    }

    /// Seal a version. Sealing is one-way; re-sealing is a no-op.
    pub async fn seal_version(&self, machine: &str, version_key: &str) -> Result<()> {
        let mut machines = self.machines.write().await;
        let entry = machines
            .get_mut(machine)
            .and_then(|versions| versions.get_mut(version_key))
            .ok_or_else(|| {
                EngineError::repository(format!(
                    "version '{}' of machine '{}' not found",
                    version_key, machine
                ))
            })?;
        entry.sealed = true;
        Ok(())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_version_document(&self, machine: &str, version_key: &str) -> Result<String> {
        let machines = self.machines.read().await;
        machines
            .get(machine)
            .and_then(|versions| versions.get(version_key))
            .map(|entry| entry.document.clone())
            .ok_or_else(|| {
                EngineError::repository(format!(
                    "version '{}' of machine '{}' not found",
                    version_key, machine
                ))
            })
    }

    async fn is_version_sealed(&self, machine: &str, version_key: &str) -> Result<bool> {
        let machines = self.machines.read().await;
        machines
            .get(machine)
            .and_then(|versions| versions.get(version_key))
            .map(|entry| entry.sealed)
            .ok_or_else(|| {
                EngineError::repository(format!(
                    "version '{}' of machine '{}' not found",
                    version_key, machine
                ))
            })
    }

    async fn list_machines(&self) -> Result<Vec<String>> {
        let machines = self.machines.read().await;
        let mut names: Vec<String> = machines.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn list_versions(&self, machine: &str) -> Result<Vec<String>> {
        let machines = self.machines.read().await;
        let mut keys: Vec<String> = machines
            .get(machine)
            .map(|versions| versions.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn list_instances(&self, machine: &str, version_key: &str) -> Result<Vec<String>> {
        let machines = self.machines.read().await;
        let mut keys: Vec<String> = machines
            .get(machine)
            .and_then(|versions| versions.get(version_key))
            .map(|entry| entry.instances.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn create_instance(&self, machine: &str, version_key: &str) -> Result<String> {
        let mut machines = self.machines.write().await;
        let entry = machines
            .get_mut(machine)
            .and_then(|versions| versions.get_mut(version_key))
            .ok_or_else(|| {
                EngineError::repository(format!(
                    "version '{}' of machine '{}' not found",
                    version_key, machine
                ))
            })?;
        let instance_key = Uuid::new_v4().to_string();
        entry
            .instances
            .insert(instance_key.clone(), InstanceEntry::default());
        Ok(instance_key)
    }

    async fn get_instance_info(&self, id: &InstanceId) -> Result<InstanceInfo> {
        let machines = self.machines.read().await;
        machines
            .get(&id.machine)
            .and_then(|versions| versions.get(&id.version_key))
            .and_then(|entry| entry.instances.get(&id.instance_key))
            .map(|instance| instance.info)
            .ok_or_else(|| EngineError::InstanceNotFound(id.clone()))
    }

    async fn set_instance_info(&self, id: &InstanceId, info: InstanceInfo) -> Result<()> {
        let mut machines = self.machines.write().await;
        let instance = machines
            .get_mut(&id.machine)
            .and_then(|versions| versions.get_mut(&id.version_key))
            .and_then(|entry| entry.instances.get_mut(&id.instance_key))
            .ok_or_else(|| EngineError::InstanceNotFound(id.clone()))?;
        instance.info = info;
        Ok(())
    }

    async fn add_snapshot(&self, id: &InstanceId, snapshot: &Snapshot) -> Result<SnapshotKey> {
        let mut machines = self.machines.write().await;
        let instance = machines
            .get_mut(&id.machine)
            .and_then(|versions| versions.get_mut(&id.version_key))
            .and_then(|entry| entry.instances.get_mut(&id.instance_key))
            .ok_or_else(|| EngineError::InstanceNotFound(id.clone()))?;
        let digest = snapshot.digest();
        let key = SnapshotKey(format!("{:08}-{}", instance.next_seq, &digest[..8]));
        instance.next_seq += 1;
        instance.snapshots.push((key.clone(), snapshot.clone()));
        Ok(key)
    }

    async fn list_snapshot_keys(&self, id: &InstanceId) -> Result<Vec<SnapshotKey>> {
        let machines = self.machines.read().await;
        let instance = machines
            .get(&id.machine)
            .and_then(|versions| versions.get(&id.version_key))
            .and_then(|entry| entry.instances.get(&id.instance_key))
            .ok_or_else(|| EngineError::InstanceNotFound(id.clone()))?;
        Ok(instance
            .snapshots
            .iter()
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn get_snapshot(&self, id: &InstanceId, key: &SnapshotKey) -> Result<Snapshot> {
        let machines = self.machines.read().await;
        let instance = machines
            .get(&id.machine)
            .and_then(|versions| versions.get(&id.version_key))
            .and_then(|entry| entry.instances.get(&id.instance_key))
            .ok_or_else(|| EngineError::InstanceNotFound(id.clone()))?;
        instance
            .snapshots
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, snapshot)| snapshot.clone())
            .ok_or_else(|| {
                EngineError::repository(format!("snapshot '{}' not found for '{}'", key, id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> (MemoryRepository, InstanceId) {
        let repo = MemoryRepository::new();
        repo.insert_version("orders", "v1", "{}").await;
        repo.seal_version("orders", "v1").await.unwrap();
        let key = repo.create_instance("orders", "v1").await.unwrap();
        (repo, InstanceId::new("orders", "v1", key))
    }

    #[tokio::test]
    async fn test_version_seal_lifecycle() {
        let repo = MemoryRepository::new();
        repo.insert_version("orders", "v1", "{}").await;
        assert!(!repo.is_version_sealed("orders", "v1").await.unwrap());
        repo.seal_version("orders", "v1").await.unwrap();
        assert!(repo.is_version_sealed("orders", "v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_version_is_repository_error() {
        let repo = MemoryRepository::new();
        let err = repo.get_version_document("orders", "v9").await.unwrap_err();
        assert_eq!(err.error_code(), "REPOSITORY_ERROR");
    }

    #[tokio::test]
    async fn test_instance_info_roundtrip() {
        let (repo, id) = seeded().await;
        assert_eq!(
            repo.get_instance_info(&id).await.unwrap(),
            InstanceInfo::default()
        );
        let info = InstanceInfo {
            has_started: true,
            ..Default::default()
        };
        repo.set_instance_info(&id, info).await.unwrap();
        assert_eq!(repo.get_instance_info(&id).await.unwrap(), info);
    }

    #[tokio::test]
    async fn test_unknown_instance_not_found() {
        let (repo, mut id) = seeded().await;
        id.instance_key = "missing".into();
        let err = repo.get_instance_info(&id).await.unwrap_err();
        assert_eq!(err.error_code(), "INSTANCE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_snapshots_ordered_and_retrievable() {
        let (repo, id) = seeded().await;
        let first = Snapshot::new(json!({"state": "a"}));
        let second = Snapshot::new(json!({"state": "b"}));
        let k1 = repo.add_snapshot(&id, &first).await.unwrap();
        let k2 = repo.add_snapshot(&id, &second).await.unwrap();

        let keys = repo.list_snapshot_keys(&id).await.unwrap();
        assert_eq!(keys, vec![k1.clone(), k2.clone()]);

        assert_eq!(repo.get_snapshot(&id, &k1).await.unwrap(), first);
        assert_eq!(repo.latest_snapshot(&id).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_latest_snapshot_empty() {
        let (repo, id) = seeded().await;
        assert_eq!(repo.latest_snapshot(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_listing_enumerates_hierarchy() {
        let (repo, id) = seeded().await;
        assert_eq!(repo.list_machines().await.unwrap(), vec!["orders"]);
        assert_eq!(repo.list_versions("orders").await.unwrap(), vec!["v1"]);
        assert_eq!(
            repo.list_instances("orders", "v1").await.unwrap(),
            vec![id.instance_key.clone()]
        );
    }
}
