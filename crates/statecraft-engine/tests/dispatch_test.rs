// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! External action dispatch round-trips against a stub action service.

mod common;

use common::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use statecraft_protocol::DispatcherConfig;

/// Fires an external action on entry; transitions on the completion events.
const DISPATCH_DOC: &str = r#"{
    "initial": "calling",
    "states": {
        "calling": {
            "entry": [{
                "$type": "{http://example.com/actions}notify",
                "channel": "ops",
                "successEvent": "done",
                "errorEvent": "fail"
            }],
            "on": {"done": "ok", "fail": "bad"}
        },
        "ok": {},
        "bad": {}
    }
}"#;

async fn engine_with_dispatcher(
    server: &MockServer,
    token: Option<String>,
) -> (std::sync::Arc<statecraft_engine::Engine>, std::sync::Arc<statecraft_core::MemoryRepository>)
{
    let mut config = test_config();
    config.dispatcher = DispatcherConfig::new(server.uri(), token);
    seeded_engine_with_config(&[("caller", "v1", DISPATCH_DOC)], config).await
}

#[tokio::test]
async fn test_dispatch_success_injects_success_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(header("authorization", "Bearer sekrit"))
        .and(body_partial_json(json!({
            "namespace": "http://example.com/actions",
            "action": "notify",
            "arguments": {"channel": "ops"}
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, _repository) = engine_with_dispatcher(&server, Some("sekrit".into())).await;
    let runtime = engine.add_instance("caller", "v1").await.unwrap();
    runtime.start(None).await.unwrap();

    wait_until_state(&runtime, "ok").await;
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_dispatch_failure_injects_error_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (engine, _repository) = engine_with_dispatcher(&server, None).await;
    let runtime = engine.add_instance("caller", "v1").await.unwrap();
    runtime.start(None).await.unwrap();

    wait_until_state(&runtime, "bad").await;
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_swap_dispatcher_live() {
    // First target always fails, replacement succeeds
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&failing)
        .await;
    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&healthy)
        .await;

    let (engine, _repository) = engine_with_dispatcher(&failing, None).await;
    let first = engine.add_instance("caller", "v1").await.unwrap();
    first.start(None).await.unwrap();
    wait_until_state(&first, "bad").await;

    // Swap: running workers receive the new target, and instances created
    // from here on inherit it
    engine
        .swap_dispatcher(DispatcherConfig::new(healthy.uri(), None))
        .await
        .unwrap();

    let second = engine.add_instance("caller", "v1").await.unwrap();
    second.start(None).await.unwrap();
    wait_until_state(&second, "ok").await;

    engine.stop_all().await.unwrap();
}
