// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Statecraft Core - shared types for the statechart runtime
//!
//! This crate defines the vocabulary the rest of the workspace speaks:
//! instance identities, lifecycle metadata, opaque snapshots, the engine
//! error taxonomy, and the [`Repository`](repository::Repository) trait that
//! describes the external collaborators (document store, instance metadata
//! store, snapshot store).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    statecraft-engine                        │
//! │        (Engine registry, InstanceRuntime supervision)       │
//! └─────────────────────────────────────────────────────────────┘
//!            │ spawns                        │ persists via
//!            ▼                               ▼
//! ┌───────────────────────┐      ┌─────────────────────────────┐
//! │  Worker process       │      │   dyn Repository            │
//! │  (statecraft-         │      │   (documents, metadata,     │
//! │   interpreter)        │      │    snapshots)               │
//! └───────────────────────┘      └─────────────────────────────┘
//! ```
//!
//! Storage backends are out of scope for this workspace: the repository is a
//! trait boundary, with [`repository::MemoryRepository`] as the embeddable
//! reference implementation used by tests and single-process deployments.

#![deny(missing_docs)]

/// Engine error taxonomy with error-code mapping.
pub mod error;

/// Repository collaborator trait and the in-memory backend.
pub mod repository;

/// Instance identities, lifecycle metadata, and snapshots.
pub mod types;

pub use error::{EngineError, Result};
pub use repository::{MemoryRepository, Repository};
pub use types::{InstanceId, InstanceInfo, Snapshot, SnapshotKey};
