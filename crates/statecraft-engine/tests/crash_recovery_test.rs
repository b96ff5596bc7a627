// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Crash recovery: a worker killed externally is restarted from the last
//! persisted snapshot under the same instance identity.

mod common;

use common::*;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde_json::Value;

#[tokio::test]
async fn test_worker_crash_restarts_from_last_snapshot() {
    let (engine, _repository) = seeded_engine(&[("orders", "v1", SIMPLE_DOC)]).await;
    let runtime = engine.add_instance("orders", "v1").await.unwrap();
    runtime.start(None).await.unwrap();

    // Advance and make the progress durable
    runtime.send_event("go", Value::Null).await.unwrap();
    runtime.save().await.unwrap();
    assert_eq!(active_state(&runtime).await, "running");

    let crashed_pid = runtime.worker_pid().await.expect("worker running");
    kill(Pid::from_raw(crashed_pid as i32), Signal::SIGKILL).expect("kill worker");

    // The runtime notices the exit and brings up a replacement
    let new_pid = wait_until_new_worker(&runtime, Some(crashed_pid)).await;
    assert_ne!(new_pid, crashed_pid);

    // Same identity, restored state, still fully operational
    let fetched = engine
        .get_instance(
            &runtime.id().machine,
            &runtime.id().version_key,
            &runtime.id().instance_key,
        )
        .unwrap();
    wait_until_state(&fetched, "running").await;

    fetched.send_event("finish", Value::Null).await.unwrap();
    wait_until_ended(&fetched).await;
}

#[tokio::test]
async fn test_crash_before_any_progress_restarts_cold() {
    let (engine, _repository) = seeded_engine(&[("orders", "v1", SIMPLE_DOC)]).await;
    let runtime = engine.add_instance("orders", "v1").await.unwrap();
    runtime.start(None).await.unwrap();

    let crashed_pid = runtime.worker_pid().await.expect("worker running");
    kill(Pid::from_raw(crashed_pid as i32), Signal::SIGKILL).expect("kill worker");

    wait_until_new_worker(&runtime, Some(crashed_pid)).await;
    wait_until_state(&runtime, "idle").await;

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_intentional_stop_does_not_restart() {
    let (engine, _repository) = seeded_engine(&[("orders", "v1", SIMPLE_DOC)]).await;
    let runtime = engine.add_instance("orders", "v1").await.unwrap();
    runtime.start(None).await.unwrap();
    runtime.stop().await.unwrap();

    // Give a would-be restart ample time to appear
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    assert!(!runtime.is_running().await);
    assert_eq!(runtime.worker_pid().await, None);
}
