// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The engine registry.
//!
//! Tracks every live [`InstanceRuntime`] keyed by (machine, version,
//! instance) identity, creates instances from sealed versions, broadcasts
//! global events, restores started instances on startup, and executes the
//! engine-action requests relayed from workers (spawn/start/stop/send-event
//! on other instances).

use std::sync::{Arc, Mutex as StdMutex, Weak};

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use statecraft_core::{EngineError, InstanceId, Repository, Result};
use statecraft_protocol::{DispatcherConfig, Push};

use crate::config::EngineConfig;
use crate::instance::{EngineActionEnvelope, InstanceRuntime};

/// Registry of live instance runtimes.
pub struct Engine {
    repository: Arc<dyn Repository>,
    config: EngineConfig,
    dispatcher: StdMutex<DispatcherConfig>,
    instances: DashMap<InstanceId, Arc<InstanceRuntime>>,
    action_tx: mpsc::UnboundedSender<EngineActionEnvelope>,
}

impl Engine {
    /// Create an engine over a repository.
    ///
    /// Must be called within a tokio runtime: the engine spawns its
    /// engine-action consumer task here.
    pub fn new(repository: Arc<dyn Repository>, config: EngineConfig) -> Arc<Self> {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let dispatcher = config.dispatcher.clone();
        let engine = Arc::new(Self {
            repository,
            config,
            dispatcher: StdMutex::new(dispatcher),
            instances: DashMap::new(),
            action_tx,
        });
        tokio::spawn(Self::run_engine_actions(
            Arc::downgrade(&engine),
            action_rx,
        ));
        engine
    }

    /// Create instance metadata and a runtime for a sealed version.
    ///
    /// The returned runtime is registered but not started. Fails with
    /// [`EngineError::VersionNotSealed`] on unsealed versions, before any
    /// metadata is created.
    pub async fn add_instance(
        &self,
        machine: &str,
        version_key: &str,
    ) -> Result<Arc<InstanceRuntime>> {
        if !self
            .repository
            .is_version_sealed(machine, version_key)
            .await?
        {
            return Err(EngineError::VersionNotSealed {
                machine: machine.to_string(),
                version_key: version_key.to_string(),
            });
        }

        let document = self
            .repository
            .get_version_document(machine, version_key)
            .await?;
        let instance_key = self.repository.create_instance(machine, version_key).await?;
        let id = InstanceId::new(machine, version_key, instance_key);

        let runtime = self.make_runtime(id.clone(), document, Default::default());
        self.instances.insert(id.clone(), runtime.clone());
        info!(instance = %id, "instance created");
        Ok(runtime)
    }

    /// Look up a live runtime.
    pub fn get_instance(
        &self,
        machine: &str,
        version_key: &str,
        instance_key: &str,
    ) -> Result<Arc<InstanceRuntime>> {
        let id = InstanceId::new(machine, version_key, instance_key);
        self.instances
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EngineError::InstanceNotFound(id))
    }

    /// Number of registered instances.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Broadcast an event to every started instance, skipping unstarted ones.
    pub async fn send_global_event(&self, name: &str, data: Value) -> Result<()> {
        let runtimes: Vec<Arc<InstanceRuntime>> = self
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for runtime in runtimes {
            if !runtime.has_started().await || !runtime.is_running().await {
                continue;
            }
            if let Err(e) = runtime.send_event(name, data.clone()).await {
                warn!(instance = %runtime.id(), "global event not delivered: {}", e);
            }
        }
        Ok(())
    }

    /// Restore instances from the repository.
    ///
    /// Every instance whose metadata says started-and-not-ended is restarted
    /// from its latest persisted snapshot, or cold-started if none exists.
    /// Other instances are registered without starting.
    pub async fn reload(&self) -> Result<()> {
        for machine in self.repository.list_machines().await? {
            for version_key in self.repository.list_versions(&machine).await? {
                let instance_keys = self
                    .repository
                    .list_instances(&machine, &version_key)
                    .await?;
                if instance_keys.is_empty() {
                    continue;
                }
                let document = self
                    .repository
                    .get_version_document(&machine, &version_key)
                    .await?;
                for instance_key in instance_keys {
                    let id = InstanceId::new(&machine, &version_key, &instance_key);
                    if self.instances.contains_key(&id) {
                        continue;
                    }
                    let info = self.repository.get_instance_info(&id).await?;
                    let runtime = self.make_runtime(id.clone(), document.clone(), info);
                    self.instances.insert(id.clone(), runtime.clone());

                    if info.has_started && !info.has_ended {
                        let snapshot = self.repository.latest_snapshot(&id).await?;
                        match runtime.start(snapshot).await {
                            Ok(()) => info!(instance = %id, "instance restored"),
                            Err(e) => {
                                warn!(instance = %id, "failed to restore instance: {}", e);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Replace the dispatch target for new and running instances.
    pub async fn swap_dispatcher(&self, config: DispatcherConfig) -> Result<()> {
        *self.dispatcher.lock().unwrap() = config.clone();
        let runtimes: Vec<Arc<InstanceRuntime>> = self
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for runtime in runtimes {
            if let Err(e) = runtime.swap_dispatcher(config.clone()).await {
                warn!(instance = %runtime.id(), "dispatcher swap not applied: {}", e);
            }
        }
        Ok(())
    }

    /// Stop every running instance.
    pub async fn stop_all(&self) -> Result<()> {
        let runtimes: Vec<Arc<InstanceRuntime>> = self
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for runtime in runtimes {
            if let Err(e) = runtime.stop().await {
                warn!(instance = %runtime.id(), "stop failed: {}", e);
            }
        }
        Ok(())
    }

    /// Ask every running instance to persist a snapshot of itself.
    pub async fn save_all(&self) -> Result<()> {
        let runtimes: Vec<Arc<InstanceRuntime>> = self
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for runtime in runtimes {
            if !runtime.is_running().await {
                continue;
            }
            if let Err(e) = runtime.save().await {
                warn!(instance = %runtime.id(), "save failed: {}", e);
            }
        }
        Ok(())
    }

    fn make_runtime(
        &self,
        id: InstanceId,
        document: String,
        info: statecraft_core::InstanceInfo,
    ) -> Arc<InstanceRuntime> {
        let mut config = self.config.clone();
        config.dispatcher = self.dispatcher.lock().unwrap().clone();
        InstanceRuntime::new(
            id,
            document,
            self.repository.clone(),
            config,
            info,
            self.action_tx.clone(),
        )
    }

    // ========================================================================
    // Engine-action consumer
    // ========================================================================

    async fn run_engine_actions(
        engine: Weak<Self>,
        mut action_rx: mpsc::UnboundedReceiver<EngineActionEnvelope>,
    ) {
        while let Some((origin, push)) = action_rx.recv().await {
            let Some(engine) = engine.upgrade() else { break };
            engine.handle_engine_action(origin, push).await;
        }
    }

    /// Execute one relayed engine action, then raise the caller-specified
    /// completion event back into the originating instance. Failures are
    /// logged; callers get no error event.
    async fn handle_engine_action(&self, origin: InstanceId, push: Push) {
        match push {
            Push::AddInstance {
                machine,
                version_key,
                raise,
            } => match self.add_instance(&machine, &version_key).await {
                Ok(runtime) => {
                    let data = json!({
                        "machine": machine,
                        "versionKey": version_key,
                        "instanceKey": runtime.id().instance_key,
                    });
                    self.raise_back(&origin, raise, data).await;
                }
                Err(e) => {
                    warn!(origin = %origin, code = e.error_code(), "spawn-instance failed: {}", e);
                }
            },
            Push::StartInstance {
                machine,
                version_key,
                instance_key,
                raise,
            } => {
                let result = match self.get_instance(&machine, &version_key, &instance_key) {
                    Ok(runtime) => runtime.start(None).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => {
                        let data = json!({
                            "machine": machine,
                            "versionKey": version_key,
                            "instanceKey": instance_key,
                        });
                        self.raise_back(&origin, raise, data).await;
                    }
                    Err(e) => {
                        warn!(origin = %origin, code = e.error_code(), "start-instance failed: {}", e);
                    }
                }
            }
            Push::StopInstance {
                machine,
                version_key,
                instance_key,
                raise,
            } => {
                let result = match self.get_instance(&machine, &version_key, &instance_key) {
                    Ok(runtime) => runtime.stop().await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => {
                        let data = json!({
                            "machine": machine,
                            "versionKey": version_key,
                            "instanceKey": instance_key,
                        });
                        self.raise_back(&origin, raise, data).await;
                    }
                    Err(e) => {
                        warn!(origin = %origin, code = e.error_code(), "stop-instance failed: {}", e);
                    }
                }
            }
            Push::SendEvent {
                machine,
                version_key,
                instance_key,
                name,
                data,
                raise,
            } => {
                let result = match self.get_instance(&machine, &version_key, &instance_key) {
                    Ok(runtime) => runtime.send_event(&name, data).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => {
                        let data = json!({
                            "machine": machine,
                            "versionKey": version_key,
                            "instanceKey": instance_key,
                        });
                        self.raise_back(&origin, raise, data).await;
                    }
                    Err(e) => {
                        warn!(origin = %origin, code = e.error_code(), "send-event failed: {}", e);
                    }
                }
            }
            other => {
                debug!(origin = %origin, "unexpected push on engine-action channel: {:?}", other);
            }
        }
    }

    async fn raise_back(&self, origin: &InstanceId, raise: Option<String>, data: Value) {
        let Some(event) = raise else { return };
        let runtime = self
            .instances
            .get(origin)
            .map(|entry| Arc::clone(entry.value()));
        let Some(runtime) = runtime else {
            warn!(origin = %origin, event = %event, "originating instance is gone");
            return;
        };
        // The origin may still be inside its own start handshake when the
        // action completes; give it a moment before giving up.
        for attempt in 0..20u32 {
            match runtime.send_event(&event, data.clone()).await {
                Ok(()) => return,
                Err(EngineError::NotStarted(_)) if attempt < 19 => {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
                Err(e) => {
                    warn!(origin = %origin, event = %event, "completion event not delivered: {}", e);
                    return;
                }
            }
        }
    }
}
