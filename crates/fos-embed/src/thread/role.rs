//! Thread Roles
//!
//! The two cooperating run loops: the host's UI thread and the engine thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use super::Task;

/// Thread role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Host control thread
    Ui,
    /// Thread that owns the wrapped engine
    Engine,
}

impl Role {
    /// Get role name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ui => "ui",
            Self::Engine => "engine",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Ui => 0,
            Self::Engine => 1,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Run loop state of a role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RoleState {
    /// No thread has attached yet
    Uninitialized = 0,
    /// Attached and accepting tasks
    Running = 1,
    /// Loop exited; tasks are dropped on arrival
    Stopped = 2,
}

impl RoleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Per-iteration hook (idle callback or native message pump)
pub type Hook = Box<dyn FnMut() + Send + 'static>;

/// Role statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleStats {
    /// Tasks accepted into the queue
    pub posted: u64,
    /// Tasks run by the loop
    pub executed: u64,
    /// Tasks currently queued
    pub pending: usize,
    /// Loop iterations completed
    pub iterations: u64,
}

/// Everything the dispatcher keeps for one role
pub(crate) struct RoleContext {
    role: Role,
    thread: OnceLock<ThreadId>,
    state: AtomicU8,
    queue: Mutex<VecDeque<Task>>,
    /// Signalled on every post and on quit
    signal: Condvar,
    idle: Mutex<Option<Hook>>,
    pump: Mutex<Option<Hook>>,
    quit: AtomicBool,
    /// Set while this role's thread is parked in `call_sync`
    blocked_in_sync: AtomicBool,
    posted: AtomicU64,
    executed: AtomicU64,
    iterations: AtomicU64,
}

impl RoleContext {
    pub(crate) fn new(role: Role) -> Self {
        Self {
            role,
            thread: OnceLock::new(),
            state: AtomicU8::new(RoleState::Uninitialized as u8),
            queue: Mutex::new(VecDeque::new()),
            signal: Condvar::new(),
            idle: Mutex::new(None),
            pump: Mutex::new(None),
            quit: AtomicBool::new(false),
            blocked_in_sync: AtomicBool::new(false),
            posted: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }

    /// Bind the current OS thread to this role
    pub(crate) fn attach(&self) {
        let me = thread::current().id();
        let bound = *self.thread.get_or_init(|| me);
        if bound != me {
            panic!("{} role is already bound to another thread", self.role);
        }
        self.quit.store(false, Ordering::SeqCst);
        self.state.store(RoleState::Running as u8, Ordering::SeqCst);
    }

    pub(crate) fn is_current(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    pub(crate) fn state(&self) -> RoleState {
        RoleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Queue a task. Returns the new queue depth, or the task back if stopped.
    pub(crate) fn push(&self, task: Task) -> Result<usize, Task> {
        let mut queue = self.lock_queue();
        if self.state() == RoleState::Stopped {
            return Err(task);
        }
        queue.push_back(task);
        self.posted.fetch_add(1, Ordering::Relaxed);
        let depth = queue.len();
        drop(queue);
        self.signal.notify_one();
        Ok(depth)
    }

    /// Take every task queued so far, in FIFO order
    pub(crate) fn take_batch(&self) -> VecDeque<Task> {
        std::mem::take(&mut *self.lock_queue())
    }

    pub(crate) fn mark_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_idle(&self, hook: Hook) {
        *self.idle.lock().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    pub(crate) fn set_pump(&self, hook: Hook) {
        *self.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    pub(crate) fn run_idle(&self) {
        run_hook(&self.idle);
    }

    pub(crate) fn run_pump(&self) {
        run_hook(&self.pump);
    }

    /// Park until a task arrives, quit is requested, or `timeout` passes
    pub(crate) fn park(&self, timeout: Duration) {
        let queue = self.lock_queue();
        if !queue.is_empty() || self.quit_requested() {
            return;
        }
        let _ = self
            .signal
            .wait_timeout(queue, timeout)
            .unwrap_or_else(PoisonError::into_inner);
    }

    pub(crate) fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
        let _queue = self.lock_queue();
        self.signal.notify_all();
    }

    pub(crate) fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    pub(crate) fn set_blocked_in_sync(&self, blocked: bool) {
        self.blocked_in_sync.store(blocked, Ordering::SeqCst);
    }

    pub(crate) fn is_blocked_in_sync(&self) -> bool {
        self.blocked_in_sync.load(Ordering::SeqCst)
    }

    /// Stop accepting tasks and drop everything still queued or hooked
    pub(crate) fn stop(&self) -> usize {
        let dropped = {
            let mut queue = self.lock_queue();
            self.state.store(RoleState::Stopped as u8, Ordering::SeqCst);
            std::mem::take(&mut *queue)
        };
        let count = dropped.len();
        drop(dropped);

        let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner).take();
        let pump = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop((idle, pump));
        count
    }

    pub(crate) fn pending(&self) -> usize {
        self.lock_queue().len()
    }

    pub(crate) fn stats(&self) -> RoleStats {
        RoleStats {
            posted: self.posted.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            pending: self.pending(),
            iterations: self.iterations.load(Ordering::Relaxed),
        }
    }
}

/// Run a hook without holding its lock, so it may re-register itself
fn run_hook(slot: &Mutex<Option<Hook>>) {
    let hook = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(mut hook) = hook {
        hook();
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(hook);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_names() {
        assert_eq!(Role::Ui.name(), "ui");
        assert_eq!(Role::Engine.to_string(), "engine");
    }

    #[test]
    fn test_attach_and_state() {
        let ctx = RoleContext::new(Role::Ui);
        assert_eq!(ctx.state(), RoleState::Uninitialized);
        assert!(!ctx.is_current());

        ctx.attach();
        assert_eq!(ctx.state(), RoleState::Running);
        assert!(ctx.is_current());
    }

    #[test]
    fn test_stopped_role_rejects_tasks() {
        let ctx = RoleContext::new(Role::Engine);
        ctx.attach();
        assert_eq!(ctx.push(Task::new(Role::Engine, "a", || {})).ok(), Some(1));

        assert_eq!(ctx.stop(), 1);
        assert!(ctx.push(Task::new(Role::Engine, "b", || {})).is_err());
        assert_eq!(ctx.state(), RoleState::Stopped);
    }

    #[test]
    fn test_hook_may_replace_itself() {
        let ctx = std::sync::Arc::new(RoleContext::new(Role::Engine));
        let hits = std::sync::Arc::new(AtomicU64::new(0));

        let inner_hits = std::sync::Arc::clone(&hits);
        let inner_ctx = std::sync::Arc::clone(&ctx);
        ctx.set_idle(Box::new(move || {
            inner_hits.fetch_add(1, Ordering::SeqCst);
            let replacement_hits = std::sync::Arc::clone(&inner_hits);
            inner_ctx.set_idle(Box::new(move || {
                replacement_hits.fetch_add(100, Ordering::SeqCst);
            }));
        }));

        ctx.run_idle();
        ctx.run_idle();
        assert_eq!(hits.load(Ordering::SeqCst), 101);
    }
}
