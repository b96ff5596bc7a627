// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! E2E tests for the instance lifecycle against real worker processes.

mod common;

use common::*;
use serde_json::{Value, json};

use statecraft_core::Repository;

#[tokio::test]
async fn test_add_instance_requires_sealed_version() {
    let (engine, repository) = seeded_engine(&[]).await;
    repository.insert_version("orders", "v1", SIMPLE_DOC).await;

    let err = engine.add_instance("orders", "v1").await.unwrap_err();
    assert_eq!(err.error_code(), "VERSION_NOT_SEALED");
    assert_eq!(engine.instance_count(), 0, "no runtime may be created");

    repository.seal_version("orders", "v1").await.unwrap();
    let runtime = engine.add_instance("orders", "v1").await.unwrap();
    assert!(!runtime.has_started().await);
    assert_eq!(engine.instance_count(), 1);
}

#[tokio::test]
async fn test_get_instance_unknown_fails() {
    let (engine, _repository) = seeded_engine(&[("orders", "v1", SIMPLE_DOC)]).await;
    let err = engine.get_instance("orders", "v1", "missing").unwrap_err();
    assert_eq!(err.error_code(), "INSTANCE_NOT_FOUND");
}

#[tokio::test]
async fn test_send_event_before_start_fails() {
    let (engine, _repository) = seeded_engine(&[("orders", "v1", SIMPLE_DOC)]).await;
    let runtime = engine.add_instance("orders", "v1").await.unwrap();
    let err = runtime.send_event("go", Value::Null).await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_STARTED");
}

#[tokio::test]
async fn test_start_is_guarded_against_double_start() {
    let (engine, _repository) = seeded_engine(&[("orders", "v1", SIMPLE_DOC)]).await;
    let runtime = engine.add_instance("orders", "v1").await.unwrap();

    runtime.start(None).await.unwrap();
    let first_pid = runtime.worker_pid().await.expect("worker running");

    let err = runtime.start(None).await.unwrap_err();
    assert_eq!(err.error_code(), "ALREADY_STARTED");
    // Still exactly one worker, the original one
    assert_eq!(runtime.worker_pid().await, Some(first_pid));

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_event_drives_transitions_and_live_snapshot() {
    let (engine, _repository) = seeded_engine(&[("orders", "v1", SIMPLE_DOC)]).await;
    let runtime = engine.add_instance("orders", "v1").await.unwrap();
    runtime.start(None).await.unwrap();

    assert_eq!(active_state(&runtime).await, "idle");
    runtime.send_event("go", json!({"by": "test"})).await.unwrap();
    assert_eq!(active_state(&runtime).await, "running");

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_then_resume_from_persisted_snapshot() {
    let (engine, repository) = seeded_engine(&[("orders", "v1", SIMPLE_DOC)]).await;
    let runtime = engine.add_instance("orders", "v1").await.unwrap();
    runtime.start(None).await.unwrap();
    runtime.send_event("go", Value::Null).await.unwrap();

    runtime.stop().await.unwrap();
    assert!(!runtime.is_running().await);
    assert!(runtime.info().await.has_stopped);

    // The cached snapshot answers without a worker
    assert_eq!(active_state(&runtime).await, "running");

    // Plain events are refused while stopped
    let err = runtime.send_event("finish", Value::Null).await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_STARTED");

    // Resume only via an explicit start with a persisted snapshot
    let latest = repository
        .latest_snapshot(runtime.id())
        .await
        .unwrap()
        .expect("stop persisted a snapshot");
    runtime.start(Some(latest)).await.unwrap();
    assert_eq!(active_state(&runtime).await, "running");
    assert!(!runtime.info().await.has_stopped);

    runtime.send_event("finish", Value::Null).await.unwrap();
    wait_until_ended(&runtime).await;
}

#[tokio::test]
async fn test_final_state_marks_ended_and_releases_worker() {
    let (engine, _repository) = seeded_engine(&[("orders", "v1", SIMPLE_DOC)]).await;
    let runtime = engine.add_instance("orders", "v1").await.unwrap();
    runtime.start(None).await.unwrap();

    runtime.send_event("go", Value::Null).await.unwrap();
    runtime.send_event("finish", Value::Null).await.unwrap();

    wait_until_ended(&runtime).await;
    for _ in 0..200 {
        if !runtime.is_running().await {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    assert!(!runtime.is_running().await, "worker released after finish");

    // stop() on an ended instance is a no-op
    runtime.stop().await.unwrap();
    assert_eq!(active_state(&runtime).await, "done");
}

#[tokio::test]
async fn test_snapshot_dedup_skips_identical_captures() {
    // Long tick interval: only explicit save() calls touch the store here
    let mut config = test_config();
    config.snapshot_interval = std::time::Duration::from_secs(10);
    let (engine, repository) =
        seeded_engine_with_config(&[("orders", "v1", SIMPLE_DOC)], config).await;
    let runtime = engine.add_instance("orders", "v1").await.unwrap();
    runtime.start(None).await.unwrap();

    let baseline = repository
        .list_snapshot_keys(runtime.id())
        .await
        .unwrap()
        .len();
    assert!(baseline >= 1, "start persists an initial snapshot");

    // Repeated identical captures leave the store unchanged
    assert!(runtime.save().await.unwrap().is_none());
    assert!(runtime.save().await.unwrap().is_none());
    assert_eq!(
        repository.list_snapshot_keys(runtime.id()).await.unwrap().len(),
        baseline
    );

    // A real change persists exactly one more snapshot
    runtime.send_event("go", Value::Null).await.unwrap();
    assert!(runtime.save().await.unwrap().is_some());
    assert_eq!(
        repository.list_snapshot_keys(runtime.id()).await.unwrap().len(),
        baseline + 1
    );

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_revert_to_earlier_snapshot() {
    let (engine, repository) = seeded_engine(&[("orders", "v1", SIMPLE_DOC)]).await;
    let runtime = engine.add_instance("orders", "v1").await.unwrap();
    runtime.start(None).await.unwrap();

    let initial_key = repository
        .list_snapshot_keys(runtime.id())
        .await
        .unwrap()
        .first()
        .cloned()
        .expect("initial snapshot");

    runtime.send_event("go", Value::Null).await.unwrap();
    assert_eq!(active_state(&runtime).await, "running");

    runtime.revert(&initial_key).await.unwrap();
    assert!(runtime.is_running().await);
    assert_eq!(active_state(&runtime).await, "idle");

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_send_global_event_skips_unstarted() {
    let (engine, _repository) = seeded_engine(&[("orders", "v1", SIMPLE_DOC)]).await;
    let started = engine.add_instance("orders", "v1").await.unwrap();
    let unstarted = engine.add_instance("orders", "v1").await.unwrap();
    started.start(None).await.unwrap();

    engine.send_global_event("go", Value::Null).await.unwrap();

    assert_eq!(active_state(&started).await, "running");
    assert!(!unstarted.has_started().await);

    started.stop().await.unwrap();
}
