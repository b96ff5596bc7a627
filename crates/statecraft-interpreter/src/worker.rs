// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker process main loop.
//!
//! The worker owns exactly one instance: commands arrive framed on stdin,
//! replies and pushes leave framed on stdout through a single writer task
//! (stdout is the protocol channel; logs go to stderr). Commands are
//! processed strictly in arrival order; injected events (timers, dispatch
//! completions) and the snapshot tick interleave between commands.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use statecraft_protocol::frame::{Frame, FrameError, FrameKind, read_frame, write_frame};
use statecraft_protocol::messages::{Command, CommandEnvelope, Push, Reply};

use crate::host::InterpreterHost;
use crate::interpreter::{Event, InterpreterFactory};

/// Snapshot tick interval before `init` provides one.
pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 1000;

/// Run the worker over stdin/stdout. This is the entry point used by the
/// stock worker binary; it returns when the runtime closes the channel.
pub async fn run_worker<F: InterpreterFactory>(factory: F) -> anyhow::Result<()> {
    run_worker_on(factory, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Run the worker over arbitrary channel halves (tests use in-memory pipes).
pub async fn run_worker_on<F, R, W>(factory: F, reader: R, writer: W) -> anyhow::Result<()>
where
    F: InterpreterFactory,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    // Single writer task: replies and pushes are serialized onto the channel.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                error!("failed to write frame: {}", e);
                break;
            }
        }
    });

    // Dedicated reader task keeps frame reads cancel-safe with respect to
    // the select loop below.
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<CommandEnvelope>();
    let reader_task = tokio::spawn(async move {
        let mut reader = reader;
        loop {
            match read_frame(&mut reader).await {
                Ok(frame) if frame.kind == FrameKind::Command => {
                    match frame.decode::<CommandEnvelope>() {
                        Ok(envelope) => {
                            if cmd_tx.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("undecodable command frame: {}", e),
                    }
                }
                Ok(frame) => warn!(kind = ?frame.kind, "unexpected frame kind from runtime"),
                Err(FrameError::ConnectionClosed) => {
                    debug!("runtime closed the channel");
                    break;
                }
                Err(e) => {
                    error!("failed to read frame: {}", e);
                    break;
                }
            }
        }
    });

    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Push>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let mut host: Option<InterpreterHost> = None;
    let mut interval =
        tokio::time::interval(Duration::from_millis(DEFAULT_SNAPSHOT_INTERVAL_MS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            envelope = cmd_rx.recv() => {
                let Some(envelope) = envelope else { break };
                let correlation_id = envelope.correlation_id;
                let reply = match envelope.command {
                    Command::Init {
                        document,
                        snapshot,
                        dispatcher,
                        id,
                        snapshot_interval_ms,
                    } => {
                        if host.is_some() {
                            Reply::err(correlation_id, "interpreter was already initialized")
                        } else {
                            match InterpreterHost::build(
                                &factory,
                                &document,
                                snapshot,
                                id.clone(),
                                dispatcher,
                                event_tx.clone(),
                                push_tx.clone(),
                            ) {
                                Ok(built) => {
                                    info!(instance = %id, "interpreter initialized");
                                    host = Some(built);
                                    interval = tokio::time::interval(Duration::from_millis(
                                        snapshot_interval_ms.max(1),
                                    ));
                                    interval.set_missed_tick_behavior(
                                        tokio::time::MissedTickBehavior::Skip,
                                    );
                                    Reply::ack(correlation_id)
                                }
                                Err(e) => Reply::err(correlation_id, e.to_string()),
                            }
                        }
                    }
                    Command::Start => match host.as_mut() {
                        None => Reply::err(
                            correlation_id,
                            "interpreter was not initialized, init first",
                        ),
                        Some(host) if host.started() => {
                            Reply::err(correlation_id, "interpreter has already started")
                        }
                        Some(host) => match host.start() {
                            Ok(()) => Reply::ack(correlation_id),
                            Err(e) => Reply::err(correlation_id, e.to_string()),
                        },
                    },
                    Command::Event { name, data } => match host.as_mut() {
                        None => Reply::err(
                            correlation_id,
                            "interpreter was not initialized, init first",
                        ),
                        Some(host) if !host.started() => Reply::err(
                            correlation_id,
                            "interpreter hasn't started yet, start first",
                        ),
                        Some(host) => match host.apply_event(&Event::new(name, data)) {
                            Ok(()) => Reply::ack(correlation_id),
                            Err(e) => Reply::err(correlation_id, e.to_string()),
                        },
                    },
                    Command::GetSnapshot => match host.as_ref() {
                        None => Reply::err(
                            correlation_id,
                            "interpreter was not initialized, init first",
                        ),
                        Some(host) => Reply::with_snapshot(correlation_id, host.snapshot()),
                    },
                    Command::SwapDispatcher { dispatcher } => match host.as_ref() {
                        None => Reply::err(
                            correlation_id,
                            "interpreter was not initialized, init first",
                        ),
                        Some(host) => {
                            host.swap_dispatcher(dispatcher);
                            Reply::ack(correlation_id)
                        }
                    },
                };
                match Frame::reply(&reply) {
                    Ok(frame) => {
                        if out_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => error!("failed to encode reply: {}", e),
                }
            }

            Some(push) = push_rx.recv() => {
                match Frame::push(&push) {
                    Ok(frame) => {
                        if out_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => error!("failed to encode push: {}", e),
                }
            }

            Some(event) = event_rx.recv() => {
                if let Some(host) = host.as_mut() {
                    if host.started() {
                        if let Err(e) = host.apply_event(&event) {
                            warn!(event = %event.name, "injected event rejected: {}", e);
                        }
                    }
                }
            }

            _ = interval.tick() => {
                if let Some(host) = host.as_mut() {
                    host.tick();
                }
            }
        }
    }

    reader_task.abort();
    drop(out_tx);
    let _ = writer_task.await;
    Ok(())
}
