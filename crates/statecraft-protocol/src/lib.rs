// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire protocol between an instance runtime and its worker process.
//!
//! The runtime and the worker talk over the worker's stdin/stdout with
//! length-prefixed JSON frames. Three frame kinds exist:
//!
//! | Kind | Direction | Contents |
//! |------|-----------|----------|
//! | `Command` | runtime → worker | [`messages::CommandEnvelope`] with a correlation id |
//! | `Reply` | worker → runtime | [`messages::Reply`] echoing the correlation id |
//! | `Push` | worker → runtime | [`messages::Push`] (uncorrelated notification) |
//!
//! Every command receives exactly one reply carrying the same correlation id;
//! pushes (`snapshot`, `finished`, `log`, engine-action requests) may arrive
//! at any time and are not ordered relative to in-flight commands.

pub mod frame;
pub mod messages;

pub use frame::{Frame, FrameError, FrameKind, MAX_FRAME_SIZE, read_frame, write_frame};
pub use messages::{
    Command, CommandEnvelope, DispatcherConfig, Push, Reply,
};
