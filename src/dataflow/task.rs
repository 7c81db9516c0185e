// src/dataflow/task.rs

//! Work items for the exec pool.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::dataflow::file_list::FileHandle;
use crate::dataflow::function::Function;
use crate::dataflow::instance::InstanceId;
use crate::dataflow::run::FunctionRunInput;
use crate::project::Project;

/// One controller invocation for one active instance.
pub struct Task {
    pub project: Arc<Project>,
    pub instance: InstanceId,
    pub instance_path: String,
    pub function: Arc<Function>,
    pub input: FunctionRunInput,
    pub priority: i32,
    pub seq_nr: u64,
    /// Keeps the input's files alive until the task is done.
    pub pins: Vec<FileHandle>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("project", &self.project.name())
            .field("instance", &self.instance_path)
            .field("function", &self.function.full_name())
            .field("seq_nr", &self.seq_nr)
            .finish()
    }
}

/// What an exec worker pulls off the queue.
#[derive(Debug)]
pub enum TaskItem {
    Run(Box<Task>),
    /// Park at the pause barrier.
    Pause,
    Stop,
}

/// FIFO of tasks shared by every project and drained by the exec pool.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<TaskItem>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<TaskItem>>>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub fn put(&self, item: TaskItem) {
        // the receiver lives as long as any clone of the queue
        let _ = self.tx.send(item);
    }

    /// Wait for the next item. `None` only if every sender is gone.
    pub async fn get(&self) -> Option<TaskItem> {
        self.rx.lock().await.recv().await
    }

    /// Take an item without waiting.
    pub fn try_get(&self) -> Option<TaskItem> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}
