// src/heartbeat/tracker.rs

//! Liveness bookkeeping for commands running on remote workers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::command::CommandId;

/// One command a worker reports as still running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatItem {
    pub cmd_id: CommandId,
    /// Where the worker runs it; used to salvage partial output.
    #[serde(default)]
    pub run_dir: Option<String>,
}

/// Periodic liveness signal from a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub worker_id: String,
    pub server_name: String,
    #[serde(default)]
    pub items: Vec<HeartbeatItem>,
    /// Final heartbeat of a worker that exits cleanly.
    #[serde(default)]
    pub shutdown: bool,
    /// Interval this worker sends heartbeats at, when it differs from the
    /// server's `heartbeat_time`.
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatEntry {
    pub worker_id: String,
    pub server_name: String,
    pub run_dir: Option<String>,
    /// Announced heartbeat interval; `None` means the server default.
    pub interval: Option<Duration>,
    pub last_seen: Instant,
}

impl HeartbeatEntry {
    /// Silence after which this entry's command is lost.
    pub fn timeout(&self, default_interval: Duration, factor: u32) -> Duration {
        self.interval.unwrap_or(default_interval) * factor
    }
}

/// A command whose worker went silent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostCommand {
    pub cmd_id: CommandId,
    pub worker_id: String,
    pub server_name: String,
    pub run_dir: Option<String>,
    pub silent_for: Duration,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct TrackerState {
    entries: BTreeMap<CommandId, HeartbeatEntry>,
    by_worker: BTreeMap<String, BTreeSet<CommandId>>,
}

impl TrackerState {
    fn unlink(&mut self, id: &CommandId) -> Option<HeartbeatEntry> {
        let entry = self.entries.remove(id)?;
        if let Some(set) = self.by_worker.get_mut(&entry.worker_id) {
            set.remove(id);
            if set.is_empty() {
                self.by_worker.remove(&entry.worker_id);
            }
        }
        Some(entry)
    }
}

#[derive(Debug, Default)]
pub struct HeartbeatTracker {
    state: Mutex<TrackerState>,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a command handed to `worker_id`.
    pub fn track(&self, cmd_id: CommandId, worker_id: &str, server_name: &str, now: Instant) {
        let mut st = self.lock();
        st.unlink(&cmd_id);
        st.by_worker
            .entry(worker_id.to_string())
            .or_default()
            .insert(cmd_id.clone());
        st.entries.insert(
            cmd_id,
            HeartbeatEntry {
                worker_id: worker_id.to_string(),
                server_name: server_name.to_string(),
                run_dir: None,
                interval: None,
                last_seen: now,
            },
        );
    }

    /// Stop tracking a command (it finished or was cancelled).
    pub fn forget(&self, cmd_id: &CommandId) -> Option<HeartbeatEntry> {
        self.lock().unlink(cmd_id)
    }

    /// Ingest one heartbeat: reported commands are upserted with `now`;
    /// commands the worker did not mention keep their last-seen instant.
    ///
    /// On a shutdown heartbeat the worker is dropped and the ids it still
    /// held are returned for requeueing. Reported ids tracked under another
    /// worker are not released.
    pub fn ingest(&self, hb: &Heartbeat, now: Instant) -> Vec<CommandId> {
        let mut st = self.lock();
        if hb.shutdown {
            let previous = st.by_worker.remove(&hb.worker_id).unwrap_or_default();
            for id in &previous {
                st.entries.remove(id);
            }
            let foreign: Vec<CommandId> = hb
                .items
                .iter()
                .filter(|i| st.entries.contains_key(&i.cmd_id))
                .map(|i| i.cmd_id.clone())
                .collect();
            let mut released: BTreeSet<CommandId> = previous;
            released.extend(
                hb.items
                    .iter()
                    .map(|i| i.cmd_id.clone())
                    .filter(|id| !foreign.contains(id)),
            );
            info!(worker = %hb.worker_id, released = released.len(), "worker shut down");
            return released.into_iter().collect();
        }

        for item in &hb.items {
            // a command moves with its latest reporter
            st.unlink(&item.cmd_id);
            st.by_worker
                .entry(hb.worker_id.clone())
                .or_default()
                .insert(item.cmd_id.clone());
            st.entries.insert(
                item.cmd_id.clone(),
                HeartbeatEntry {
                    worker_id: hb.worker_id.clone(),
                    server_name: hb.server_name.clone(),
                    run_dir: item.run_dir.clone(),
                    interval: hb.interval_secs.map(Duration::from_secs),
                    last_seen: now,
                },
            );
        }
        debug!(worker = %hb.worker_id, commands = hb.items.len(), "heartbeat");
        Vec::new()
    }

    /// Remove and return every command silent for longer than `factor`
    /// heartbeat intervals, its worker's own interval if it announced one.
    pub fn sweep(&self, now: Instant, default_interval: Duration, factor: u32) -> Vec<LostCommand> {
        let mut st = self.lock();
        let expired: Vec<CommandId> = st
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_seen) > e.timeout(default_interval, factor))
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| {
                let entry = st.unlink(&id)?;
                Some(LostCommand {
                    silent_for: now.saturating_duration_since(entry.last_seen),
                    cmd_id: id,
                    worker_id: entry.worker_id,
                    server_name: entry.server_name,
                    run_dir: entry.run_dir,
                })
            })
            .collect()
    }

    pub fn get(&self, cmd_id: &CommandId) -> Option<HeartbeatEntry> {
        self.lock().entries.get(cmd_id).cloned()
    }

    pub fn worker_commands(&self, worker_id: &str) -> Vec<CommandId> {
        self.lock()
            .by_worker
            .get(worker_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Comparable copy of the tracker contents.
    pub fn snapshot(&self) -> BTreeMap<CommandId, HeartbeatEntry> {
        self.lock().entries.clone()
    }
}
