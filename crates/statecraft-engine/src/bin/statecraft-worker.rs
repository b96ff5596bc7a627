// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stock worker binary.
//!
//! Hosts one statechart instance over stdin/stdout. Spawned by the engine,
//! never run by hand. Stdout carries protocol frames, so all logging goes
//! to stderr.

use anyhow::Result;
use tracing::info;

use statecraft_interpreter::chart::ChartFactory;
use statecraft_interpreter::worker::run_worker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("statecraft=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Statecraft worker starting");
    run_worker(ChartFactory).await?;
    info!("Statecraft worker exiting");
    Ok(())
}
