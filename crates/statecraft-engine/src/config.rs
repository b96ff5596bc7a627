// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use statecraft_protocol::DispatcherConfig;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker executable spawned per started instance.
    pub worker_program: PathBuf,
    /// Worker snapshot-tick interval.
    pub snapshot_interval: Duration,
    /// Timeout for one runtime-to-worker request.
    pub request_timeout: Duration,
    /// Default external action-dispatch target for new instances.
    pub dispatcher: DispatcherConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_program: default_worker_program(),
            snapshot_interval: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(30),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `STATECRAFT_WORKER_PROGRAM`: worker executable path
    ///   (default: `statecraft-worker` next to the current executable)
    /// - `STATECRAFT_SNAPSHOT_INTERVAL_MS`: snapshot tick interval (default: 1000)
    /// - `STATECRAFT_REQUEST_TIMEOUT_MS`: worker request timeout (default: 30000)
    /// - `STATECRAFT_DISPATCHER_URL`: external action service base URL
    /// - `STATECRAFT_DISPATCHER_TOKEN`: bearer token for the action service
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(program) = std::env::var("STATECRAFT_WORKER_PROGRAM") {
            config.worker_program = PathBuf::from(program);
        }

        if let Ok(raw) = std::env::var("STATECRAFT_SNAPSHOT_INTERVAL_MS") {
            let ms: u64 = raw.parse().map_err(|_| {
                ConfigError::Invalid(
                    "STATECRAFT_SNAPSHOT_INTERVAL_MS",
                    "must be a positive integer of milliseconds",
                )
            })?;
            config.snapshot_interval = Duration::from_millis(ms.max(1));
        }

        if let Ok(raw) = std::env::var("STATECRAFT_REQUEST_TIMEOUT_MS") {
            let ms: u64 = raw.parse().map_err(|_| {
                ConfigError::Invalid(
                    "STATECRAFT_REQUEST_TIMEOUT_MS",
                    "must be a positive integer of milliseconds",
                )
            })?;
            config.request_timeout = Duration::from_millis(ms.max(1));
        }

        if let Ok(url) = std::env::var("STATECRAFT_DISPATCHER_URL") {
            let token = std::env::var("STATECRAFT_DISPATCHER_TOKEN").ok();
            config.dispatcher = DispatcherConfig::new(url, token);
        }

        Ok(config)
    }
}

/// Default worker program: `statecraft-worker` next to the current
/// executable, falling back to a bare name resolved via `PATH`.
fn default_worker_program() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("statecraft-worker")))
        .filter(|candidate| candidate.exists())
        .unwrap_or_else(|| PathBuf::from("statecraft-worker"))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
