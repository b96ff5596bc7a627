// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the statechart engine.
//!
//! Lifecycle precondition violations surface as typed failures; engine-action
//! argument errors are logged where they occur and never reach this taxonomy
//! as propagated errors.

use thiserror::Error;

use crate::types::InstanceId;

/// Result type using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine registry and instance runtimes.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Instances may only be created from sealed versions.
    #[error("version '{version_key}' of machine '{machine}' is not sealed")]
    VersionNotSealed {
        /// Machine name.
        machine: String,
        /// Version key that is not sealed.
        version_key: String,
    },

    /// The registry has no instance under this identity.
    #[error("instance '{0}' not found")]
    InstanceNotFound(InstanceId),

    /// `start` was called while a worker is already running.
    #[error("instance '{0}' has already started")]
    AlreadyStarted(InstanceId),

    /// An operation that requires a started instance was called too early.
    #[error("instance '{0}' has not started yet")]
    NotStarted(InstanceId),

    /// An engine action was invoked without a required argument.
    #[error("engine action '{action}' is missing required argument '{argument}'")]
    MissingArgument {
        /// Engine action local name.
        action: String,
        /// Name of the missing argument.
        argument: String,
    },

    /// The worker process exited while a request was pending.
    #[error("worker for instance '{0}' died before replying")]
    WorkerDied(InstanceId),

    /// The worker process could not be spawned.
    #[error("failed to spawn worker for instance '{id}': {reason}")]
    WorkerSpawn {
        /// Instance identity.
        id: InstanceId,
        /// Underlying spawn failure.
        reason: String,
    },

    /// A runtime-to-worker request exceeded the configured timeout.
    #[error("request '{command}' to instance '{id}' timed out")]
    RequestTimeout {
        /// Instance identity.
        id: InstanceId,
        /// Command that timed out.
        command: String,
    },

    /// The external action dispatch call failed at the transport level.
    #[error("dispatch to '{url}' failed: {reason}")]
    DispatchTransport {
        /// Dispatcher endpoint.
        url: String,
        /// Transport failure details.
        reason: String,
    },

    /// A repository collaborator failed.
    #[error("repository error: {0}")]
    Repository(String),

    /// The worker violated the command/response protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl EngineError {
    /// Stable error-code string for this error, for logs and wire surfaces.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::VersionNotSealed { .. } => "VERSION_NOT_SEALED",
            Self::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            Self::AlreadyStarted(_) => "ALREADY_STARTED",
            Self::NotStarted(_) => "NOT_STARTED",
            Self::MissingArgument { .. } => "MISSING_ARGUMENT",
            Self::WorkerDied(_) => "WORKER_DIED",
            Self::WorkerSpawn { .. } => "WORKER_SPAWN_FAILED",
            Self::RequestTimeout { .. } => "REQUEST_TIMEOUT",
            Self::DispatchTransport { .. } => "DISPATCH_TRANSPORT",
            Self::Repository(_) => "REPOSITORY_ERROR",
            Self::Protocol(_) => "PROTOCOL_ERROR",
        }
    }

    /// Shorthand for a repository failure.
    pub fn repository(reason: impl Into<String>) -> Self {
        Self::Repository(reason.into())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Protocol(err.to_string())
    }
}
