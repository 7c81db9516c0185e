use std::sync::{Arc, Mutex};

use copernicus::dataflow::task::{TaskItem, TaskQueue};
use copernicus::exec::execute;

/// A fake executor that:
/// - drains the task queue on demand instead of in the background, so a
///   test decides when controllers run
/// - records the instance path of every task it ran.
pub struct FakeExecutor {
    tasks: TaskQueue,
    executed: Arc<Mutex<Vec<String>>>,
}

impl FakeExecutor {
    pub fn new(tasks: TaskQueue) -> Self {
        Self {
            tasks,
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Run queued tasks, including any they spawn, until the queue is empty.
    /// Returns how many ran.
    pub async fn drain(&self) -> usize {
        let mut ran = 0;
        while let Some(item) = self.tasks.try_get() {
            match item {
                TaskItem::Run(task) => {
                    self.executed.lock().unwrap().push(task.instance_path.clone());
                    execute(*task).await;
                    ran += 1;
                }
                TaskItem::Pause | TaskItem::Stop => {}
            }
        }
        ran
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// How many tasks ran for `path`.
    pub fn runs_of(&self, path: &str) -> usize {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_str() == path)
            .count()
    }
}
