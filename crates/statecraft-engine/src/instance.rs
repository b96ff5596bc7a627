// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The per-instance runtime.
//!
//! An [`InstanceRuntime`] owns the live execution of exactly one statechart
//! instance: it spawns the isolated worker process, speaks the
//! correlation-id command/response protocol with it, persists deduplicated
//! snapshots, and supervises the worker. A worker exit that was not caused
//! by an intentional `stop` (and not preceded by reaching a final state) is
//! answered with an automatic restart from the last known snapshot; any
//! interpreter progress since that snapshot is lost, which bounds crash
//! damage to "repeat the last unsaved step".

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use tokio::process::{Child, ChildStdin, ChildStdout, Command as WorkerCommand};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use statecraft_core::{
    EngineError, InstanceId, InstanceInfo, Repository, Result, Snapshot, SnapshotKey,
};
use statecraft_protocol::frame::{Frame, FrameError, FrameKind, read_frame, write_frame};
use statecraft_protocol::messages::{Command, CommandEnvelope, DispatcherConfig, Push, Reply};

use crate::config::EngineConfig;

/// Engine-action request relayed from a worker, tagged with its origin.
pub type EngineActionEnvelope = (InstanceId, Push);

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<Reply>>>>;

struct WorkerHandle {
    stdin: Arc<Mutex<ChildStdin>>,
    pid: Option<u32>,
    kill_tx: oneshot::Sender<()>,
    intentional: Arc<AtomicBool>,
}

struct RuntimeState {
    worker: Option<WorkerHandle>,
    info: InstanceInfo,
}

/// Owns the lifecycle of one statechart instance's live execution.
pub struct InstanceRuntime {
    // Self-reference for handing clones to supervision tasks; always
    // upgradable while a method borrow exists (every owner is an Arc).
    self_ref: Weak<InstanceRuntime>,
    id: InstanceId,
    document: String,
    repository: Arc<dyn Repository>,
    config: EngineConfig,
    dispatcher: StdMutex<DispatcherConfig>,
    state: Mutex<RuntimeState>,
    pending: PendingMap,
    next_correlation: AtomicU64,
    last_snapshot: StdMutex<Option<Snapshot>>,
    last_persisted_digest: StdMutex<Option<String>>,
    action_tx: mpsc::UnboundedSender<EngineActionEnvelope>,
}

impl InstanceRuntime {
    /// Create a runtime (not yet started).
    ///
    /// `info` is the instance's current metadata; the registry passes the
    /// stored flags when reconstructing instances on reload.
    pub fn new(
        id: InstanceId,
        document: String,
        repository: Arc<dyn Repository>,
        config: EngineConfig,
        info: InstanceInfo,
        action_tx: mpsc::UnboundedSender<EngineActionEnvelope>,
    ) -> Arc<Self> {
        let dispatcher = config.dispatcher.clone();
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            id,
            document,
            repository,
            config,
            dispatcher: StdMutex::new(dispatcher),
            state: Mutex::new(RuntimeState { worker: None, info }),
            pending: Arc::new(StdMutex::new(HashMap::new())),
            next_correlation: AtomicU64::new(1),
            last_snapshot: StdMutex::new(None),
            last_persisted_digest: StdMutex::new(None),
            action_tx,
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("runtime is owned by an Arc")
    }

    /// Instance identity.
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    /// Whether a worker process is currently running.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.worker.is_some()
    }

    /// OS pid of the current worker, if running.
    pub async fn worker_pid(&self) -> Option<u32> {
        self.state
            .lock()
            .await
            .worker
            .as_ref()
            .and_then(|worker| worker.pid)
    }

    /// Current lifecycle flags (cached; mirrors the metadata store).
    pub async fn info(&self) -> InstanceInfo {
        self.state.lock().await.info
    }

    /// Whether the instance has been started at least once.
    pub async fn has_started(&self) -> bool {
        self.info().await.has_started
    }

    /// Whether the instance reached a final state.
    pub async fn has_ended(&self) -> bool {
        self.info().await.has_ended
    }

    /// Start the instance, spawning a worker process.
    ///
    /// Fails with [`EngineError::AlreadyStarted`] while a worker is running.
    /// Passing a snapshot resumes from it; terminated instances can only be
    /// resumed this way.
    pub async fn start(&self, snapshot: Option<Snapshot>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.worker.is_some() {
            return Err(EngineError::AlreadyStarted(self.id.clone()));
        }

        // Seed the dedup digest from the store so a restart does not
        // re-persist the snapshot it resumed from.
        if self.last_persisted_digest.lock().unwrap().is_none() {
            if let Some(latest) = self.repository.latest_snapshot(&self.id).await? {
                *self.last_snapshot.lock().unwrap() = Some(latest.clone());
                *self.last_persisted_digest.lock().unwrap() = Some(latest.digest());
            }
        }

        self.spawn_worker(&mut state, snapshot).await?;

        state.info.has_started = true;
        // An explicit resume supersedes an earlier stop
        state.info.has_stopped = false;
        let info = state.info;
        self.repository.set_instance_info(&self.id, info).await?;
        let stdin = state
            .worker
            .as_ref()
            .map(|worker| worker.stdin.clone())
            .expect("worker just spawned");
        drop(state);

        // Initial snapshot
        match self.request_on(&stdin, Command::GetSnapshot).await {
            Ok(Some(snapshot)) => {
                self.persist_snapshot(&snapshot).await?;
            }
            Ok(None) => {
                return Err(EngineError::Protocol(
                    "getSnapshot reply carried no snapshot".to_string(),
                ));
            }
            Err(e) => return Err(e),
        }

        info!(instance = %self.id, "instance started");
        Ok(())
    }

    /// Stop the instance: persist a final snapshot, mark it stopped, and
    /// terminate the worker. No-op if never started or already ended.
    /// A stopped instance is only resumable via an explicit
    /// [`start`](Self::start) with a persisted snapshot.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.info.has_started || state.info.has_ended {
            return Ok(());
        }

        if let Some(worker) = state.worker.take() {
            worker.intentional.store(true, Ordering::SeqCst);
            // Final snapshot, best effort: a hung worker must not block stop
            match self.request_on(&worker.stdin, Command::GetSnapshot).await {
                Ok(Some(snapshot)) => {
                    if let Err(e) = self.persist_snapshot(&snapshot).await {
                        warn!(instance = %self.id, "failed to persist final snapshot: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(instance = %self.id, "no final snapshot from worker: {}", e);
                }
            }
            let _ = worker.kill_tx.send(());
        }

        state.info.has_stopped = true;
        let info = state.info;
        self.repository.set_instance_info(&self.id, info).await?;
        info!(instance = %self.id, "instance stopped");
        Ok(())
    }

    /// Forward an event to the worker.
    ///
    /// Fails with [`EngineError::NotStarted`] before the first start and
    /// after a stop.
    pub async fn send_event(&self, name: &str, data: serde_json::Value) -> Result<()> {
        let stdin = {
            let state = self.state.lock().await;
            if !state.info.has_started {
                return Err(EngineError::NotStarted(self.id.clone()));
            }
            match &state.worker {
                Some(worker) => worker.stdin.clone(),
                None => return Err(EngineError::NotStarted(self.id.clone())),
            }
        };
        self.request_on(
            &stdin,
            Command::Event {
                name: name.to_string(),
                data,
            },
        )
        .await?;
        Ok(())
    }

    /// Current snapshot.
    ///
    /// Live round trip to the worker while running; after a stop or finish
    /// the last cached snapshot is returned without contacting anything.
    pub async fn get_snapshot(&self) -> Result<Snapshot> {
        let stdin = {
            let state = self.state.lock().await;
            if !state.info.has_started {
                return Err(EngineError::NotStarted(self.id.clone()));
            }
            if state.info.has_stopped || state.info.has_ended {
                None
            } else {
                state.worker.as_ref().map(|worker| worker.stdin.clone())
            }
        };

        match stdin {
            Some(stdin) => {
                let snapshot = self
                    .request_on(&stdin, Command::GetSnapshot)
                    .await?
                    .ok_or_else(|| {
                        EngineError::Protocol("getSnapshot reply carried no snapshot".to_string())
                    })?;
                *self.last_snapshot.lock().unwrap() = Some(snapshot.clone());
                Ok(snapshot)
            }
            None => {
                if let Some(cached) = self.last_snapshot.lock().unwrap().clone() {
                    return Ok(cached);
                }
                self.repository
                    .latest_snapshot(&self.id)
                    .await?
                    .ok_or_else(|| {
                        EngineError::repository(format!("no snapshot recorded for '{}'", self.id))
                    })
            }
        }
    }

    /// Request a live snapshot and persist it (deduplicated).
    pub async fn save(&self) -> Result<Option<SnapshotKey>> {
        let snapshot = self.get_snapshot().await?;
        self.persist_snapshot(&snapshot).await
    }

    /// Stop, then start again from a previously persisted snapshot.
    pub async fn revert(&self, key: &SnapshotKey) -> Result<()> {
        let snapshot = self.repository.get_snapshot(&self.id, key).await?;
        self.stop().await?;
        self.start(Some(snapshot)).await
    }

    /// Update the external action-dispatch target, live if a worker runs.
    pub async fn swap_dispatcher(&self, config: DispatcherConfig) -> Result<()> {
        *self.dispatcher.lock().unwrap() = config.clone();
        let stdin = {
            let state = self.state.lock().await;
            state.worker.as_ref().map(|worker| worker.stdin.clone())
        };
        if let Some(stdin) = stdin {
            self.request_on(&stdin, Command::SwapDispatcher { dispatcher: config })
                .await?;
        }
        Ok(())
    }

    // ========================================================================
    // Worker supervision
    // ========================================================================

    /// Spawn a worker process and run the init/start handshake.
    async fn spawn_worker(
        &self,
        state: &mut RuntimeState,
        snapshot: Option<Snapshot>,
    ) -> Result<()> {
        let mut child = WorkerCommand::new(&self.config.worker_program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::WorkerSpawn {
                id: self.id.clone(),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| EngineError::WorkerSpawn {
            id: self.id.clone(),
            reason: "worker stdin unavailable".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| EngineError::WorkerSpawn {
            id: self.id.clone(),
            reason: "worker stdout unavailable".to_string(),
        })?;

        let pid = child.id();
        let stdin = Arc::new(Mutex::new(stdin));
        let intentional = Arc::new(AtomicBool::new(false));
        let (kill_tx, kill_rx) = oneshot::channel();

        state.worker = Some(WorkerHandle {
            stdin: stdin.clone(),
            pid,
            kill_tx,
            intentional: intentional.clone(),
        });

        let runtime = self.arc();
        tokio::spawn(async move { runtime.read_worker(stdout).await });

        let runtime = self.arc();
        tokio::spawn(async move { runtime.monitor_worker(child, kill_rx, intentional).await });

        let init = Command::Init {
            document: self.document.clone(),
            snapshot,
            dispatcher: self.dispatcher.lock().unwrap().clone(),
            id: self.id.clone(),
            snapshot_interval_ms: self.config.snapshot_interval.as_millis() as u64,
        };

        if let Err(e) = self.request_on(&stdin, init).await {
            self.discard_worker(state);
            return Err(e);
        }
        if let Err(e) = self.request_on(&stdin, Command::Start).await {
            self.discard_worker(state);
            return Err(e);
        }

        debug!(instance = %self.id, pid = ?pid, "worker spawned");
        Ok(())
    }

    /// Tear down a worker that failed its handshake.
    fn discard_worker(&self, state: &mut RuntimeState) {
        if let Some(worker) = state.worker.take() {
            worker.intentional.store(true, Ordering::SeqCst);
            let _ = worker.kill_tx.send(());
        }
    }

    /// Reader task: routes replies to pending requests and reacts to pushes.
    async fn read_worker(self: Arc<Self>, mut stdout: ChildStdout) {
        loop {
            match read_frame(&mut stdout).await {
                Ok(frame) => match frame.kind {
                    FrameKind::Reply => match frame.decode::<Reply>() {
                        Ok(reply) => {
                            let sender = self
                                .pending
                                .lock()
                                .unwrap()
                                .remove(&reply.correlation_id);
                            match sender {
                                Some(sender) => {
                                    let _ = sender.send(reply);
                                }
                                None => {
                                    debug!(
                                        instance = %self.id,
                                        correlation_id = reply.correlation_id,
                                        "reply for unknown correlation id"
                                    );
                                }
                            }
                        }
                        Err(e) => warn!(instance = %self.id, "undecodable reply: {}", e),
                    },
                    FrameKind::Push => match frame.decode::<Push>() {
                        Ok(push) => self.handle_push(push).await,
                        Err(e) => warn!(instance = %self.id, "undecodable push: {}", e),
                    },
                    FrameKind::Command => {
                        warn!(instance = %self.id, "worker sent a command frame");
                    }
                },
                Err(FrameError::ConnectionClosed) => break,
                Err(e) => {
                    warn!(instance = %self.id, "worker channel error: {}", e);
                    break;
                }
            }
        }
        self.fail_pending();
    }

    /// Exit monitor: waits for the worker process and restarts it when the
    /// exit was not intentional.
    async fn monitor_worker(
        self: Arc<Self>,
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        intentional: Arc<AtomicBool>,
    ) {
        tokio::select! {
            status = child.wait() => {
                self.fail_pending();
                if intentional.load(Ordering::SeqCst) {
                    debug!(instance = %self.id, "worker exited after intentional stop");
                    return;
                }
                let code = status.ok().and_then(|s| s.code());
                warn!(instance = %self.id, exit_code = ?code, "worker exited unexpectedly");
                self.restart_after_crash().await;
            }
            _ = kill_rx => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                self.fail_pending();
                debug!(instance = %self.id, "worker terminated");
            }
        }
    }

    /// Restart from the last known snapshot after an unexpected worker exit.
    async fn restart_after_crash(&self) {
        let mut state = self.state.lock().await;
        state.worker = None;
        if !state.info.has_started || state.info.has_stopped || state.info.has_ended {
            return;
        }
        let snapshot = self.last_snapshot.lock().unwrap().clone();
        match self.spawn_worker(&mut state, snapshot).await {
            Ok(()) => {
                info!(instance = %self.id, "worker restarted from last snapshot");
            }
            Err(e) => {
                error!(instance = %self.id, "failed to restart worker: {}", e);
            }
        }
    }

    /// Fail every pending request with [`EngineError::WorkerDied`] (the
    /// dropped senders surface as such on the caller side).
    fn fail_pending(&self) {
        self.pending.lock().unwrap().clear();
    }

    async fn handle_push(&self, push: Push) {
        match push {
            Push::Snapshot { snapshot } => {
                if let Err(e) = self.persist_snapshot(&snapshot).await {
                    warn!(instance = %self.id, "failed to persist snapshot: {}", e);
                }
            }
            Push::Finished => {
                // Runs detached: the reader must keep draining replies while
                // this takes the state lock.
                let runtime = self.arc();
                tokio::spawn(async move { runtime.on_finished().await });
            }
            Push::Log { message } => {
                info!(instance = %self.id, "{}", message);
            }
            relay @ (Push::AddInstance { .. }
            | Push::StartInstance { .. }
            | Push::StopInstance { .. }
            | Push::SendEvent { .. }) => {
                if self.action_tx.send((self.id.clone(), relay)).is_err() {
                    warn!(instance = %self.id, "engine action channel closed");
                }
            }
        }
    }

    async fn on_finished(self: Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.info.has_ended {
            return;
        }
        state.info.has_ended = true;
        let info = state.info;
        if let Some(worker) = state.worker.take() {
            worker.intentional.store(true, Ordering::SeqCst);
            let _ = worker.kill_tx.send(());
        }
        drop(state);
        info!(instance = %self.id, "instance reached a final state");
        if let Err(e) = self.repository.set_instance_info(&self.id, info).await {
            warn!(instance = %self.id, "failed to record final state: {}", e);
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Persist a snapshot unless it equals the most recently persisted one.
    async fn persist_snapshot(&self, snapshot: &Snapshot) -> Result<Option<SnapshotKey>> {
        *self.last_snapshot.lock().unwrap() = Some(snapshot.clone());
        let digest = snapshot.digest();
        if self.last_persisted_digest.lock().unwrap().as_deref() == Some(digest.as_str()) {
            return Ok(None);
        }
        let key = self.repository.add_snapshot(&self.id, snapshot).await?;
        *self.last_persisted_digest.lock().unwrap() = Some(digest);
        debug!(instance = %self.id, key = %key, "snapshot persisted");
        Ok(Some(key))
    }

    // ========================================================================
    // Command/response protocol
    // ========================================================================

    #[allow(dead_code)]
    fn _assert_checks(&self, state: &mut RuntimeState) {
        fn needs_send<F: std::future::Future + Send>(_: F) {}
        needs_send(self.spawn_worker(state, None));
    }

    /// Send one command and await its correlated reply.
    async fn request_on(
        &self,
        stdin: &Arc<Mutex<ChildStdin>>,
        command: Command,
    ) -> Result<Option<Snapshot>> {
        let name = command.name();
        let correlation_id = self.next_correlation.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(correlation_id, tx);

        let envelope = CommandEnvelope {
            correlation_id,
            command,
        };
        let frame = match Frame::command(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.lock().unwrap().remove(&correlation_id);
                return Err(EngineError::Protocol(e.to_string()));
            }
        };

        {
            let mut stdin = stdin.lock().await;
            if write_frame(&mut *stdin, &frame).await.is_err() {
                self.pending.lock().unwrap().remove(&correlation_id);
                return Err(EngineError::WorkerDied(self.id.clone()));
            }
        }

        match timeout(self.config.request_timeout, rx).await {
            Err(_) => {
                self.pending.lock().unwrap().remove(&correlation_id);
                Err(EngineError::RequestTimeout {
                    id: self.id.clone(),
                    command: name.to_string(),
                })
            }
            Ok(Err(_)) => Err(EngineError::WorkerDied(self.id.clone())),
            Ok(Ok(reply)) => reply.into_result().map_err(EngineError::Protocol),
        }
    }
}
