use std::future::Future;

use tokio::task::JoinHandle;
use tracing::debug;

/// A background task owned by a component.
pub struct TaskLease {
    name: &'static str,
    task: Option<JoinHandle<()>>,
}

impl TaskLease {
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "background task started");
        Self {
            name,
            task: Some(tokio::spawn(future)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Returns `true` only for the call that actually stopped the task.
    pub fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                debug!(task = self.name, "background task cancelled");
                true
            }
            None => false,
        }
    }
}

impl Drop for TaskLease {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[path = "tests/lease_tests.rs"]
mod tests;
