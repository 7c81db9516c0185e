// src/command/queue.rs

//! Priority-bucketed command queue.
//!
//! One FIFO per priority level in `[-12, 12]`; reads scan from the highest
//! level down. Priorities outside the range are clamped on insertion.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::command::command::{Command, CommandId};

pub const MIN_PRIORITY: i32 = -12;
pub const MAX_PRIORITY: i32 = 12;
const LEVELS: usize = (MAX_PRIORITY - MIN_PRIORITY + 1) as usize;

/// Verdict of a [`CmdQueue::get_until`] visitor for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Pop the command out of the queue.
    pub take: bool,
    /// Keep visiting commands after this one.
    pub cont: bool,
}

impl Selection {
    pub const SKIP: Selection = Selection {
        take: false,
        cont: true,
    };
    pub const TAKE: Selection = Selection {
        take: true,
        cont: true,
    };
    pub const TAKE_AND_STOP: Selection = Selection {
        take: true,
        cont: false,
    };
    pub const STOP: Selection = Selection {
        take: false,
        cont: false,
    };
}

#[derive(Debug)]
pub struct CmdQueue {
    levels: Mutex<Vec<VecDeque<Command>>>,
    notify: Notify,
}

impl Default for CmdQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn level_index(priority: i32) -> usize {
    (MAX_PRIORITY - priority.clamp(MIN_PRIORITY, MAX_PRIORITY)) as usize
}

impl CmdQueue {
    pub fn new() -> Self {
        Self {
            levels: Mutex::new((0..LEVELS).map(|_| VecDeque::new()).collect()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<VecDeque<Command>>> {
        self.levels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push `cmd` to the tail of its level, assigning an id if it has none.
    pub fn add(&self, mut cmd: Command) -> CommandId {
        if !cmd.id.is_assigned() {
            cmd.id = CommandId::generate();
        }
        let id = cmd.id.clone();
        let idx = level_index(cmd.full_priority());
        debug!(cmd_id = %id, priority = cmd.full_priority(), "command queued");
        self.lock()[idx].push_back(cmd);
        self.notify.notify_waiters();
        id
    }

    /// Pop the head of the highest non-empty level.
    pub fn get(&self) -> Option<Command> {
        self.lock().iter_mut().find_map(VecDeque::pop_front)
    }

    pub fn remove(&self, id: &CommandId) -> Option<Command> {
        let mut levels = self.lock();
        for level in levels.iter_mut() {
            if let Some(pos) = level.iter().position(|c| &c.id == id) {
                return level.remove(pos);
            }
        }
        None
    }

    /// Remove every command matching `pred`, keeping the order of the rest.
    pub fn remove_where<F>(&self, mut pred: F) -> Vec<Command>
    where
        F: FnMut(&Command) -> bool,
    {
        let mut removed = Vec::new();
        for level in self.lock().iter_mut() {
            let (out, keep): (VecDeque<_>, VecDeque<_>) =
                std::mem::take(level).into_iter().partition(|c| pred(c));
            *level = keep;
            removed.extend(out);
        }
        removed
    }

    /// Visit commands from the highest level down. Commands the visitor
    /// takes are popped and returned; the rest keep their relative order.
    /// Visiting stops at the first verdict with `cont == false`.
    pub fn get_until<F>(&self, mut visit: F) -> Vec<Command>
    where
        F: FnMut(&mut Command) -> Selection,
    {
        let mut taken = Vec::new();
        let mut levels = self.lock();
        'levels: for level in levels.iter_mut() {
            let mut kept = VecDeque::with_capacity(level.len());
            while let Some(mut cmd) = level.pop_front() {
                let verdict = visit(&mut cmd);
                if verdict.take {
                    taken.push(cmd);
                } else {
                    kept.push_back(cmd);
                }
                if !verdict.cont {
                    kept.extend(level.drain(..));
                    *level = kept;
                    break 'levels;
                }
            }
            *level = kept;
        }
        taken
    }

    /// Drop every queued command owned by project `project`.
    pub fn delete_by_project(&self, project: &str) -> Vec<Command> {
        self.remove_where(|c| c.project() == Some(project))
    }

    pub fn exists(&self, id: &CommandId) -> bool {
        self.lock().iter().any(|level| level.iter().any(|c| &c.id == id))
    }

    /// Snapshot in retrieval order.
    pub fn list(&self) -> Vec<Command> {
        self.lock().iter().flat_map(|level| level.iter().cloned()).collect()
    }

    pub fn size(&self) -> usize {
        self.lock().iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Wait until the queue holds at least one command, for at most `wait`.
    /// Returns whether the queue is non-empty.
    pub async fn wait_nonempty(&self, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            if !self.is_empty() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return !self.is_empty();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::command::CommandOwner;

    fn cmd(name: &str, prio: i32) -> Command {
        Command::new(name).with_owner(CommandOwner {
            project: "p".into(),
            instance_path: "i".into(),
            task_seq: 1,
            task_priority: prio,
        })
    }

    #[test]
    fn get_scans_high_to_low_fifo_within_level() {
        let q = CmdQueue::new();
        q.add(cmd("c1", -2));
        q.add(cmd("c2", 5));
        q.add(cmd("c3", 0));
        q.add(cmd("c4", 5));
        let order: Vec<String> = std::iter::from_fn(|| q.get()).map(|c| c.executable).collect();
        assert_eq!(order, vec!["c2", "c4", "c3", "c1"]);
    }

    #[test]
    fn add_assigns_ids_once() {
        let q = CmdQueue::new();
        let mut c = cmd("x", 0);
        c.id = CommandId::from("fixed");
        assert_eq!(q.add(c).as_str(), "fixed");
        let id = q.add(cmd("y", 0));
        assert!(id.is_assigned());
        assert!(q.exists(&id));
        assert_eq!(q.remove(&id).map(|c| c.executable), Some("y".to_string()));
        assert!(!q.exists(&id));
    }

    #[test]
    fn get_until_keeps_order_of_skipped_items() {
        let q = CmdQueue::new();
        for name in ["a", "b", "c", "d"] {
            q.add(cmd(name, 0));
        }
        let taken = q.get_until(|c| {
            if c.executable == "b" {
                Selection::TAKE
            } else if c.executable == "c" {
                Selection::STOP
            } else {
                Selection::SKIP
            }
        });
        assert_eq!(taken.len(), 1);
        let rest: Vec<String> = q.list().into_iter().map(|c| c.executable).collect();
        assert_eq!(rest, vec!["a", "c", "d"]);
    }

    #[test]
    fn out_of_range_priorities_clamp() {
        let q = CmdQueue::new();
        q.add(cmd("top", 12));
        q.add(cmd("huge", 1000));
        q.add(cmd("low", -1000));
        q.add(cmd("bottom", -12));
        let order: Vec<String> = std::iter::from_fn(|| q.get()).map(|c| c.executable).collect();
        assert_eq!(order, vec!["top", "huge", "low", "bottom"]);
    }

    #[test]
    fn delete_by_project_leaves_others() {
        let q = CmdQueue::new();
        q.add(cmd("mine", 0));
        q.add(Command::new("orphan"));
        let removed = q.delete_by_project("p");
        assert_eq!(removed.len(), 1);
        assert_eq!(q.size(), 1);
    }

    #[tokio::test]
    async fn wait_nonempty_wakes_on_add() {
        let q = std::sync::Arc::new(CmdQueue::new());
        assert!(!q.wait_nonempty(Duration::from_millis(10)).await);
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.wait_nonempty(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.add(cmd("x", 0));
        assert!(waiter.await.unwrap());
    }
}
