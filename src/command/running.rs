// src/command/running.rs

//! Commands currently executed by some worker.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::command::command::{Command, CommandId, WorkerLocation};
use crate::errors::{CpcError, Result};

#[derive(Debug, Default)]
pub struct RunningCmdList {
    cmds: Mutex<BTreeMap<CommandId, Command>>,
}

impl RunningCmdList {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<CommandId, Command>> {
        self.cmds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `cmd` as running on `worker`. Adding an id twice is an error.
    pub fn add(&self, mut cmd: Command, worker: WorkerLocation) -> Result<()> {
        let mut cmds = self.lock();
        if cmds.contains_key(&cmd.id) {
            return Err(CpcError::DuplicateCommand(cmd.id.to_string()));
        }
        debug!(cmd_id = %cmd.id, worker = %worker.worker_id, "command running");
        cmd.running = true;
        cmd.worker = Some(worker);
        cmds.insert(cmd.id.clone(), cmd);
        Ok(())
    }

    pub fn remove(&self, id: &CommandId) -> Result<Command> {
        let mut cmd = self
            .lock()
            .remove(id)
            .ok_or_else(|| CpcError::CommandNotFound(id.to_string()))?;
        cmd.running = false;
        Ok(cmd)
    }

    /// Whether `id` is running on `worker_id`.
    pub fn is_owned_by(&self, id: &CommandId, worker_id: &str) -> bool {
        self.lock()
            .get(id)
            .is_some_and(|c| c.worker.as_ref().is_some_and(|w| w.worker_id == worker_id))
    }

    /// Remove `id` only if it runs on `worker_id`.
    pub fn remove_owned(&self, id: &CommandId, worker_id: &str) -> Option<Command> {
        let mut cmds = self.lock();
        let owned = cmds
            .get(id)
            .is_some_and(|c| c.worker.as_ref().is_some_and(|w| w.worker_id == worker_id));
        if !owned {
            return None;
        }
        let mut cmd = cmds.remove(id)?;
        cmd.running = false;
        Some(cmd)
    }

    pub fn get(&self, id: &CommandId) -> Result<Command> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| CpcError::CommandNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &CommandId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn list(&self) -> Vec<Command> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry matching `pred`.
    pub fn remove_where<F>(&self, mut pred: F) -> Vec<Command>
    where
        F: FnMut(&Command) -> bool,
    {
        let mut cmds = self.lock();
        let ids: Vec<CommandId> = cmds
            .values()
            .filter(|c| pred(*c))
            .map(|c| c.id.clone())
            .collect();
        ids.iter()
            .filter_map(|id| cmds.remove(id))
            .map(|mut c| {
                c.running = false;
                c
            })
            .collect()
    }

    pub fn for_worker(&self, worker_id: &str) -> Vec<CommandId> {
        self.lock()
            .values()
            .filter(|c| c.worker.as_ref().is_some_and(|w| w.worker_id == worker_id))
            .map(|c| c.id.clone())
            .collect()
    }
}
