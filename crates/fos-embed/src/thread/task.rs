//! Task
//!
//! A heap-owned unit of cross-thread work. Created on the posting thread,
//! run exactly once on its target role, then dropped there.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::Role;

/// Task ID counter
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> u64 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Task function type
pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// Delivery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    /// Fire-and-forget
    Async,
    /// Caller is parked until the task completes
    Sync,
}

/// Deferred work targeting one thread role
pub struct Task {
    /// Unique task ID
    pub id: u64,
    /// Role the task must run on
    pub target: Role,
    /// Delivery mode
    pub mode: TaskMode,
    /// Task name (for debugging)
    pub name: &'static str,
    /// Creation time
    pub created: Instant,
    body: TaskFn,
}

impl Task {
    /// Create a fire-and-forget task
    pub fn new<F>(target: Role, name: &'static str, body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id: next_task_id(),
            target,
            mode: TaskMode::Async,
            name,
            created: Instant::now(),
            body: Box::new(body),
        }
    }

    /// Create a task whose result is handed back through a `Completion`
    pub fn with_result<F, R>(target: Role, name: &'static str, body: F) -> (Self, Arc<Completion<R>>)
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let completion = Arc::new(Completion::new());
        let responder = Responder {
            completion: Some(Arc::clone(&completion)),
        };

        let mut task = Self::new(target, name, move || responder.complete(body()));
        task.mode = TaskMode::Sync;
        (task, completion)
    }

    /// Run the task, consuming it
    pub fn run(self) {
        (self.body)()
    }

    /// Time since the task was created
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("mode", &self.mode)
            .field("name", &self.name)
            .finish()
    }
}

enum Slot<R> {
    Pending,
    Ready(R),
    Abandoned,
}

/// Result slot plus completion signal for a synchronous task
pub struct Completion<R> {
    slot: Mutex<Slot<R>>,
    signal: Condvar,
}

impl<R> Completion<R> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            signal: Condvar::new(),
        }
    }

    fn fill(&self, slot: Slot<R>) {
        let mut current = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *current = slot;
        self.signal.notify_all();
    }

    /// Block until the task has run
    ///
    /// Returns `None` if the task was dropped without completing
    /// (it panicked, or its role stopped first).
    pub fn wait(&self) -> Option<R> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let mut slot = self
            .signal
            .wait_while(slot, |slot| matches!(slot, Slot::Pending))
            .unwrap_or_else(PoisonError::into_inner);

        match std::mem::replace(&mut *slot, Slot::Abandoned) {
            Slot::Ready(value) => Some(value),
            Slot::Pending | Slot::Abandoned => None,
        }
    }
}

/// Writing end of a `Completion`; abandons the slot if dropped unused
struct Responder<R> {
    completion: Option<Arc<Completion<R>>>,
}

impl<R> Responder<R> {
    fn complete(mut self, value: R) {
        if let Some(completion) = self.completion.take() {
            completion.fill(Slot::Ready(value));
        }
    }
}

impl<R> Drop for Responder<R> {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            completion.fill(Slot::Abandoned);
        }
    }
}
