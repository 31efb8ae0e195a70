use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

type Task = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Inner {
    tasks: Mutex<Vec<Task>>,
}

impl Inner {
    fn run(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        if !tasks.is_empty() {
            trace!("running {} cleanup tasks", tasks.len());
        }
        for task in tasks.into_iter().rev() {
            task();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.run();
    }
}

/// An ordered list of release actions shared by the layers of a SUL. Tasks run last to first
/// when [`CleanupTasks::execute`] is called and at the latest when the last handle is dropped.
/// A task runs at most once.
#[derive(Clone, Default)]
pub struct CleanupTasks {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CleanupTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CleanupTasks({} pending)", self.len())
    }
}

impl CleanupTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit<F: FnOnce() + Send + 'static>(&self, task: F) {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(task));
    }

    pub fn execute(&self) {
        self.inner.run();
    }

    pub fn len(&self) -> usize {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
