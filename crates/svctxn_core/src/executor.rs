//! Task execution capability attached to every transaction.
//!
//! The dependency-graph task layer lives outside this crate; it only needs each
//! transaction to carry an executor it can submit work to.

use std::fmt;
use std::thread;

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks on behalf of a transaction.
pub trait TaskExecutor: Send + Sync {
    /// Executes `task`, possibly on another thread.
    fn execute(&self, task: Task);
}

/// Runs every task on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

/// Spawns a named thread per task.
#[derive(Clone)]
pub struct ThreadExecutor {
    name: String,
}

impl ThreadExecutor {
    /// Creates an executor whose threads are named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new("svctxn-task")
    }
}

impl fmt::Debug for ThreadExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadExecutor")
            .field("name", &self.name)
            .finish()
    }
}

impl TaskExecutor for ThreadExecutor {
    fn execute(&self, task: Task) {
        let spawned = thread::Builder::new().name(self.name.clone()).spawn(task);
        if let Err(e) = spawned {
            tracing::error!(target: "svctxn::txn", error = %e, "failed to spawn task thread");
        }
    }
}
