// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for statecraft-engine integration tests.
//!
//! Seeds an in-memory repository with sealed chart documents and builds an
//! engine wired to the real `statecraft-worker` binary.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use statecraft_core::MemoryRepository;
use statecraft_engine::{Engine, EngineConfig, InstanceRuntime};
use statecraft_protocol::DispatcherConfig;

/// A small chart: idle --go--> running --finish--> done (final),
/// with running --reset--> idle for revert/loop tests.
pub const SIMPLE_DOC: &str = r#"{
    "initial": "idle",
    "states": {
        "idle": {"on": {"go": "running"}},
        "running": {"on": {"finish": "done", "reset": "idle"}},
        "done": {"final": true}
    }
}"#;

/// Path of the worker binary built alongside the tests.
pub fn worker_program() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_statecraft-worker"))
}

/// Engine configuration tuned for tests: fast snapshot ticks, a timeout
/// short enough to fail fast but far above worker round-trip latency.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        worker_program: worker_program(),
        snapshot_interval: Duration::from_millis(50),
        request_timeout: Duration::from_secs(10),
        dispatcher: DispatcherConfig::default(),
    }
}

/// Build an engine over a repository seeded with sealed versions.
pub async fn seeded_engine(
    documents: &[(&str, &str, &str)],
) -> (Arc<Engine>, Arc<MemoryRepository>) {
    let repository = Arc::new(MemoryRepository::new());
    for (machine, version_key, document) in documents {
        repository
            .insert_version(machine, version_key, document)
            .await;
        repository.seal_version(machine, version_key).await.unwrap();
    }
    let engine = Engine::new(repository.clone(), test_config());
    (engine, repository)
}

/// Build an engine with a custom configuration.
pub async fn seeded_engine_with_config(
    documents: &[(&str, &str, &str)],
    config: EngineConfig,
) -> (Arc<Engine>, Arc<MemoryRepository>) {
    let repository = Arc::new(MemoryRepository::new());
    for (machine, version_key, document) in documents {
        repository
            .insert_version(machine, version_key, document)
            .await;
        repository.seal_version(machine, version_key).await.unwrap();
    }
    let engine = Engine::new(repository.clone(), config);
    (engine, repository)
}

/// Active state name from a live snapshot.
pub async fn active_state(runtime: &Arc<InstanceRuntime>) -> String {
    let snapshot = runtime.get_snapshot().await.expect("snapshot");
    snapshot.as_value()["configuration"][0]
        .as_str()
        .expect("configuration entry")
        .to_string()
}

/// Poll until the instance reports the expected active state.
pub async fn wait_until_state(runtime: &Arc<InstanceRuntime>, expected: &str) {
    for _ in 0..200 {
        if let Ok(snapshot) = runtime.get_snapshot().await {
            if snapshot.as_value()["configuration"][0] == *expected {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for state '{}'", expected);
}

/// Poll until the instance is marked ended.
pub async fn wait_until_ended(runtime: &Arc<InstanceRuntime>) {
    for _ in 0..200 {
        if runtime.has_ended().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for the instance to end");
}

/// Poll until a running worker with a pid different from `old` exists.
pub async fn wait_until_new_worker(runtime: &Arc<InstanceRuntime>, old: Option<u32>) -> u32 {
    for _ in 0..200 {
        if let Some(pid) = runtime.worker_pid().await {
            if Some(pid) != old {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for a replacement worker");
}
