// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Named, cancelable timers for the `schedule`/`unschedule` engine actions.
//!
//! The job table is owned by the worker that created it and dies with the
//! worker process; pending jobs are not persisted. Charts that need timers
//! to survive a crash re-issue them from their entry actions on resume.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::interpreter::Event;

/// Parse a `date`/`when` argument into a deadline.
///
/// Accepted forms: an RFC 3339 string (absolute), or an integer — plain or
/// as a string — meaning milliseconds from now.
pub fn parse_deadline(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            text.parse::<i64>()
                .ok()
                .map(|ms| Utc::now() + chrono::Duration::milliseconds(ms))
        }
        Value::Number(number) => number
            .as_i64()
            .map(|ms| Utc::now() + chrono::Duration::milliseconds(ms)),
        _ => None,
    }
}

/// Timer table injecting events into the owning instance when deadlines fire.
#[derive(Clone)]
pub struct Scheduler {
    jobs: Arc<Mutex<HashMap<String, AbortHandle>>>,
    injector: mpsc::UnboundedSender<Event>,
}

impl Scheduler {
    /// Create a scheduler that injects fired events through `injector`.
    pub fn new(injector: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            injector,
        }
    }

    /// Register a timer. A `job` id makes it cancelable; re-using an id
    /// replaces (and cancels) the previous timer under that id.
    pub fn schedule(
        &self,
        job: Option<String>,
        fire_at: DateTime<Utc>,
        event: String,
        data: Value,
    ) {
        let delay = (fire_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let jobs = self.jobs.clone();
        let injector = self.injector.clone();
        let job_for_task = job.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(ref id) = job_for_task {
                jobs.lock().unwrap().remove(id);
            }
            debug!(event = %event, "scheduled deadline elapsed");
            if injector.send(Event::new(event, data)).is_err() {
                warn!("event injector closed, dropping scheduled event");
            }
        })
        .abort_handle();

        if let Some(id) = job {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(previous) = jobs.insert(id.clone(), handle) {
                debug!(job = %id, "replacing existing scheduled job");
                previous.abort();
            }
        }
    }

    /// Cancel a pending job. Unknown ids are logged and ignored.
    pub fn cancel(&self, job: &str) -> bool {
        match self.jobs.lock().unwrap().remove(job) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => {
                debug!(job, "unschedule for unknown job id");
                false
            }
        }
    }

    /// Number of cancelable jobs currently pending.
    pub fn pending(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}
