// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Statecraft Engine - statechart execution engine
//!
//! This crate is the host side of the runtime. It instantiates sealed
//! statechart documents as live, crash-recoverable processes and drives them
//! with events.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            Engine                                   │
//! │      (registry: create, lookup, broadcast, reload, actions)         │
//! └─────────────────────────────────────────────────────────────────────┘
//!        │ owns many                                   │ engine actions
//!        ▼                                             │ (spawn/start/
//! ┌───────────────────────┐     commands/replies       │  stop/send)
//! │   InstanceRuntime     │◄───────────────────────────┘
//! │  (one per instance)   │──────────────┐
//! └───────────────────────┘   spawns     │ snapshots
//!        │                               ▼
//!        ▼                     ┌──────────────────────┐
//! ┌───────────────────────┐    │   dyn Repository     │
//! │  Worker process       │    │ (documents, metadata,│
//! │  (statecraft-worker)  │    │  snapshots)          │
//! └───────────────────────┘    └──────────────────────┘
//! ```
//!
//! Each started instance lives in its own OS worker process hosting the
//! interpreter; the runtime exchanges length-prefixed JSON frames with it
//! over stdin/stdout (see `statecraft-protocol`). Worker crashes are
//! absorbed by restarting from the last persisted snapshot.
//!
//! # Lifecycle
//!
//! ```text
//!            add_instance            start()
//!   (sealed version) ──► registered ────────► running ──┬─► final state
//!                                      ▲                │      (ended)
//!                                      │ start(snapshot)│ stop()
//!                                      └─── stopped ◄───┘
//! ```
//!
//! Lifecycle violations fail fast with typed errors (`ALREADY_STARTED`,
//! `NOT_STARTED`, `VERSION_NOT_SEALED`, `INSTANCE_NOT_FOUND`); worker
//! failures surface only to requests pending at the moment of the crash
//! (`WORKER_DIED`), everything else is recovered automatically.

pub mod config;
pub mod engine;
pub mod instance;

pub use config::EngineConfig;
pub use engine::Engine;
pub use instance::InstanceRuntime;
