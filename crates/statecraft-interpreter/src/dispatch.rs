// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Custom-action routing.
//!
//! A resolved action goes one of two ways:
//!
//! - namespace matches the reserved engine namespace (case-insensitive):
//!   the local name is looked up in the engine-action table; unknown names
//!   are silently ignored.
//! - anything else: POSTed to `<dispatcherURL>/execute` as
//!   `{namespace, action, arguments}` with optional bearer auth,
//!   fire-and-forget. The caller can request completion events through the
//!   `successEvent`/`errorEvent` arguments, which are injected back into the
//!   instance when the call settles.
//!
//! With no dispatcher URL configured, non-reserved actions are dropped.

use std::sync::RwLock;

use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use statecraft_core::{EngineError, InstanceId};
use statecraft_protocol::DispatcherConfig;

use crate::actions::EngineActions;
use crate::interpreter::Event;

/// Namespace reserved for engine actions.
pub const ENGINE_ACTION_NAMESPACE: &str = "https://statecraft.dev/engine";

/// Split a `{uri}localname` qualified string into namespace and local name.
///
/// Without a `{uri}` prefix the namespace is empty and the whole string is
/// the local name.
pub fn split_qualified(qualified: &str) -> (&str, &str) {
    if let Some(rest) = qualified.strip_prefix('{') {
        if let Some(end) = rest.find('}') {
            return (&rest[..end], &rest[end + 1..]);
        }
    }
    ("", qualified)
}

/// Typed completion-event contract parsed from the resolved arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionEvents {
    /// Event injected when the external call succeeds.
    pub on_success: Option<String>,
    /// Event injected when the external call fails.
    pub on_error: Option<String>,
}

impl CompletionEvents {
    /// Extract `successEvent`/`errorEvent` from an argument map.
    pub fn from_args(args: &Map<String, Value>) -> Self {
        let event_name = |key: &str| {
            args.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            on_success: event_name("successEvent"),
            on_error: event_name("errorEvent"),
        }
    }
}

/// Routes resolved custom actions for one instance.
pub struct ActionDispatcher {
    id: InstanceId,
    config: RwLock<DispatcherConfig>,
    client: reqwest::Client,
    engine_actions: EngineActions,
    injector: mpsc::UnboundedSender<Event>,
}

impl ActionDispatcher {
    /// Create a dispatcher for `id`.
    pub fn new(
        id: InstanceId,
        config: DispatcherConfig,
        engine_actions: EngineActions,
        injector: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            id,
            config: RwLock::new(config),
            client: reqwest::Client::new(),
            engine_actions,
            injector,
        }
    }

    /// Replace the external dispatch target.
    pub fn swap(&self, config: DispatcherConfig) {
        *self.config.write().unwrap() = config;
    }

    /// Route one resolved action.
    pub fn dispatch(&self, qualified: &str, args: Map<String, Value>) {
        let (namespace, action) = split_qualified(qualified);

        if namespace.eq_ignore_ascii_case(ENGINE_ACTION_NAMESPACE) {
            self.engine_actions.execute(action, &args);
            return;
        }

        let config = self.config.read().unwrap().clone();
        let Some(url) = config.url else {
            debug!(
                instance = %self.id,
                action = qualified,
                "no dispatcher configured, dropping external action"
            );
            return;
        };

        let completion = CompletionEvents::from_args(&args);
        let endpoint = format!("{}/execute", url.trim_end_matches('/'));
        let body = json!({
            "namespace": namespace,
            "action": action,
            "arguments": args,
        });

        let id = self.id.clone();
        let client = self.client.clone();
        let token = config.token;
        let injector = self.injector.clone();
        tokio::spawn(async move {
            let mut request = client.post(&endpoint).json(&body);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    if let Some(event) = completion.on_success {
                        let _ = injector.send(Event::new(event, Value::Null));
                    }
                }
                Ok(response) => {
                    let status = response.status();
                    warn!(instance = %id, %endpoint, %status, "action dispatch rejected");
                    if let Some(event) = completion.on_error {
                        let _ = injector.send(Event::new(
                            event,
                            json!({"status": status.as_u16()}),
                        ));
                    }
                }
                Err(e) => {
                    let err = EngineError::DispatchTransport {
                        url: endpoint.clone(),
                        reason: e.to_string(),
                    };
                    warn!(instance = %id, code = err.error_code(), "{}", err);
                    if let Some(event) = completion.on_error {
                        let _ = injector.send(Event::new(
                            event,
                            json!({"error": e.to_string()}),
                        ));
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        dispatcher: ActionDispatcher,
        events: mpsc::UnboundedReceiver<Event>,
        scheduler: Scheduler,
    }

    fn fixture(config: DispatcherConfig) -> Fixture {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (push_tx, _pushes) = mpsc::unbounded_channel();
        let id = InstanceId::new("orders", "v1", "i1");
        let scheduler = Scheduler::new(event_tx.clone());
        let engine_actions = EngineActions::new(id.clone(), scheduler.clone(), push_tx);
        Fixture {
            dispatcher: ActionDispatcher::new(id, config, engine_actions, event_tx),
            events,
            scheduler,
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_split_qualified() {
        assert_eq!(
            split_qualified("{https://statecraft.dev/engine}schedule"),
            ("https://statecraft.dev/engine", "schedule")
        );
        assert_eq!(split_qualified("plain"), ("", "plain"));
        assert_eq!(split_qualified("{unterminated"), ("", "{unterminated"));
    }

    #[test]
    fn test_completion_events_from_args() {
        let parsed = CompletionEvents::from_args(&args(
            json!({"successEvent": "done", "errorEvent": "fail", "other": 1}),
        ));
        assert_eq!(parsed.on_success.as_deref(), Some("done"));
        assert_eq!(parsed.on_error.as_deref(), Some("fail"));
        assert_eq!(CompletionEvents::from_args(&Map::new()), CompletionEvents::default());
    }

    #[tokio::test]
    async fn test_engine_namespace_routes_locally() {
        let server = MockServer::start().await;
        // Any HTTP call would be recorded; none is expected
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut fx = fixture(DispatcherConfig::new(server.uri(), None));
        // Mixed-case namespace must still match
        fx.dispatcher.dispatch(
            "{HTTPS://STATECRAFT.DEV/ENGINE}schedule",
            args(json!({"raise": "tick", "date": 10, "job": "j1"})),
        );

        let event = timeout(Duration::from_secs(2), fx.events.recv())
            .await
            .expect("engine schedule should fire")
            .unwrap();
        assert_eq!(event.name, "tick");
        assert_eq!(fx.scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_external_success_injects_success_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .and(header("authorization", "Bearer sekrit"))
            .and(body_partial_json(json!({
                "namespace": "http://example.com/acts",
                "action": "notify",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut fx = fixture(DispatcherConfig::new(server.uri(), Some("sekrit".into())));
        fx.dispatcher.dispatch(
            "{http://example.com/acts}notify",
            args(json!({"successEvent": "done", "channel": "ops"})),
        );

        let event = timeout(Duration::from_secs(5), fx.events.recv())
            .await
            .expect("success event expected")
            .unwrap();
        assert_eq!(event.name, "done");
    }

    #[tokio::test]
    async fn test_external_failure_injects_error_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut fx = fixture(DispatcherConfig::new(server.uri(), None));
        fx.dispatcher.dispatch(
            "{http://example.com/acts}notify",
            args(json!({"successEvent": "done", "errorEvent": "fail"})),
        );

        let event = timeout(Duration::from_secs(5), fx.events.recv())
            .await
            .expect("error event expected")
            .unwrap();
        assert_eq!(event.name, "fail");
        assert_eq!(event.data["status"], json!(500));
    }

    #[tokio::test]
    async fn test_transport_error_injects_error_event() {
        // Port 9 (discard) refuses connections on the loopback
        let mut fx = fixture(DispatcherConfig::new("http://127.0.0.1:9", None));
        fx.dispatcher.dispatch(
            "{http://example.com/acts}notify",
            args(json!({"errorEvent": "fail"})),
        );

        let event = timeout(Duration::from_secs(10), fx.events.recv())
            .await
            .expect("transport error event expected")
            .unwrap();
        assert_eq!(event.name, "fail");
    }

    #[tokio::test]
    async fn test_unconfigured_dispatcher_drops_action() {
        let mut fx = fixture(DispatcherConfig::default());
        fx.dispatcher.dispatch(
            "{http://example.com/acts}notify",
            args(json!({"successEvent": "done"})),
        );
        assert!(
            timeout(Duration::from_millis(100), fx.events.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_swap_changes_target() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut fx = fixture(DispatcherConfig::default());
        fx.dispatcher.swap(DispatcherConfig::new(server.uri(), None));
        fx.dispatcher.dispatch(
            "{http://example.com/acts}notify",
            args(json!({"successEvent": "done"})),
        );

        let event = timeout(Duration::from_secs(5), fx.events.recv())
            .await
            .expect("success event expected after swap")
            .unwrap();
        assert_eq!(event.name, "done");
    }
}
