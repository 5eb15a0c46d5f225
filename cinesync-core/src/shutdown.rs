//! Ordered graceful shutdown.
//!
//! Components register prioritized tasks at startup; on SIGINT/SIGTERM the
//! registry runs each exactly once in ascending priority order. Tasks must
//! be idempotent.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};

type ShutdownFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct Task {
    priority: i32,
    name: String,
    run: ShutdownFn,
}

pub struct ShutdownTasks {
    tasks: Mutex<Vec<Task>>,
    fired: AtomicBool,
    task_timeout: Duration,
}

impl ShutdownTasks {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            fired: AtomicBool::new(false),
            task_timeout: Duration::from_secs(10),
        }
    }

    /// Register a task; lower priorities run first.
    pub fn register<F, Fut>(&self, priority: i32, name: &str, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().push(Task {
            priority,
            name: name.to_string(),
            run: Box::new(move || Box::pin(task())),
        });
    }

    /// Run all registered tasks once. Later calls are no-ops.
    pub async fn run(&self) {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        tasks.sort_by_key(|t| t.priority);
        for task in tasks {
            info!(task = %task.name, "running shutdown task");
            if tokio::time::timeout(self.task_timeout, (task.run)())
                .await
                .is_err()
            {
                warn!(task = %task.name, "shutdown task timed out");
            }
        }
    }
}

impl Default for ShutdownTasks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_tasks_run_in_priority_order() {
        let shutdown = ShutdownTasks::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (priority, tag) in [(2, "late"), (0, "early"), (1, "middle")] {
            let order = order.clone();
            shutdown.register(priority, tag, move || async move {
                order.lock().push(tag);
            });
        }

        shutdown.run().await;
        assert_eq!(*order.lock(), vec!["early", "middle", "late"]);
    }

    #[tokio::test]
    async fn test_run_is_once() {
        let shutdown = ShutdownTasks::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        shutdown.register(0, "task", move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        });

        shutdown.run().await;
        shutdown.run().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
