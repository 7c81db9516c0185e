// src/exec/pool.rs

//! Fixed pool of task executors.
//!
//! Every executor loops on the shared task queue. Pausing pushes one
//! `Pause` sentinel per executor and waits on a barrier until all of them
//! have parked; resuming releases a second barrier. Shutdown is a pause
//! that never resumes.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Barrier, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dataflow::task::{Task, TaskItem, TaskQueue};
use crate::exec::controller::run_controller;

#[derive(Debug, Default)]
struct PoolState {
    paused: bool,
    stopped: bool,
}

pub struct ExecPool {
    queue: TaskQueue,
    size: usize,
    parked: Arc<Barrier>,
    released: Arc<Barrier>,
    handles: StdMutex<Vec<JoinHandle<()>>>,
    state: Mutex<PoolState>,
}

impl ExecPool {
    /// Spawn `size` executors (at least one) on the current runtime.
    pub fn start(queue: TaskQueue, size: usize) -> Self {
        let size = size.max(1);
        let parked = Arc::new(Barrier::new(size + 1));
        let released = Arc::new(Barrier::new(size + 1));
        let handles = (0..size)
            .map(|id| {
                let queue = queue.clone();
                let parked = Arc::clone(&parked);
                let released = Arc::clone(&released);
                tokio::spawn(async move { executor_loop(id, queue, parked, released).await })
            })
            .collect();
        info!(executors = size, "exec pool started");
        Self {
            queue,
            size,
            parked,
            released,
            handles: StdMutex::new(handles),
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Return once every executor has finished its current task and parked.
    pub async fn pause(&self) {
        let mut st = self.state.lock().await;
        if st.paused || st.stopped {
            return;
        }
        for _ in 0..self.size {
            self.queue.put(TaskItem::Pause);
        }
        self.parked.wait().await;
        st.paused = true;
        info!("exec pool paused");
    }

    pub async fn resume(&self) {
        let mut st = self.state.lock().await;
        if !st.paused || st.stopped {
            return;
        }
        self.released.wait().await;
        st.paused = false;
        info!("exec pool resumed");
    }

    /// Quiesce the executors and drop them.
    pub async fn shutdown(&self) {
        self.pause().await;
        let mut st = self.state.lock().await;
        st.stopped = true;
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            handle.abort();
        }
        info!("exec pool stopped");
    }
}

async fn executor_loop(id: usize, queue: TaskQueue, parked: Arc<Barrier>, released: Arc<Barrier>) {
    debug!(executor = id, "executor started");
    loop {
        match queue.get().await {
            Some(TaskItem::Run(task)) => execute(*task).await,
            Some(TaskItem::Pause) => {
                parked.wait().await;
                released.wait().await;
            }
            Some(TaskItem::Stop) | None => break,
        }
    }
    debug!(executor = id, "executor finished");
}

/// Run one task's controller and hand the result back to its project.
pub async fn execute(task: Task) {
    let Task {
        project,
        instance,
        instance_path,
        function,
        input,
        seq_nr,
        pins,
        ..
    } = task;
    debug!(project = %project.name(), instance = %instance_path, seq_nr, "task started");
    let result = run_controller(&function, input).await.map_err(|e| {
        warn!(project = %project.name(), instance = %instance_path, error = %e, "controller failed");
        e.to_string()
    });
    project.complete_task(instance, seq_nr, result);
    drop(pins);
}
