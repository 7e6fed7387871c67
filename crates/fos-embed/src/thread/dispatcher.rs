//! Thread Dispatcher
//!
//! Moves tasks between the UI and engine run loops.
//! - `post_async`: FIFO per (source thread, target role)
//! - `call_sync`: blocks the caller until the task ran on its target
//! - same-thread calls run inline and never touch the queue

use std::time::Duration;

use super::{Hook, Role, RoleContext, RoleState, RoleStats, Task};

/// Two-role task dispatcher
pub struct Dispatcher {
    roles: [RoleContext; 2],
    /// Longest park between loop iterations
    idle_interval: Duration,
    /// Queue depth that triggers a warning
    queue_warn_threshold: usize,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("ui", &self.role_state(Role::Ui))
            .field("engine", &self.role_state(Role::Engine))
            .field("idle_interval", &self.idle_interval)
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher with no threads attached
    pub fn new(idle_interval: Duration, queue_warn_threshold: usize) -> Self {
        Self {
            roles: [RoleContext::new(Role::Ui), RoleContext::new(Role::Engine)],
            idle_interval,
            queue_warn_threshold,
        }
    }

    fn context(&self, role: Role) -> &RoleContext {
        &self.roles[role.index()]
    }

    /// Bind the calling thread to `role` and mark it running
    ///
    /// # Panics
    /// If another thread is already bound to `role`.
    pub fn attach(&self, role: Role) {
        self.context(role).attach();
        tracing::debug!(role = role.name(), "thread attached");
    }

    /// Role of the calling thread, if any
    pub fn current_role(&self) -> Option<Role> {
        self.roles
            .iter()
            .find(|ctx| ctx.is_current())
            .map(RoleContext::role)
    }

    /// Check if the calling thread is `role`
    pub fn is_on(&self, role: Role) -> bool {
        self.context(role).is_current()
    }

    /// Fail fast unless the calling thread is `role`
    pub fn assert_on(&self, role: Role, what: &str) {
        if !self.is_on(role) {
            usage_violation(format_args!(
                "{what} must run on the {role} thread (called from {:?})",
                std::thread::current().name().unwrap_or("<unnamed>")
            ));
        }
    }

    /// Current loop state of `role`
    pub fn role_state(&self, role: Role) -> RoleState {
        self.context(role).state()
    }

    /// Queue a closure on `role` and return immediately
    pub fn post_async<F>(&self, role: Role, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_task(Task::new(role, std::any::type_name::<F>(), f));
    }

    /// Queue a prepared task on its target role
    ///
    /// Tasks posted to a stopped role are dropped without running.
    pub fn post_task(&self, task: Task) {
        let role = task.target;
        tracing::trace!(task = task.id, name = task.name, role = role.name(), "post");

        match self.context(role).push(task) {
            Ok(depth) if depth == self.queue_warn_threshold => {
                tracing::warn!(role = role.name(), depth, "task queue is backing up");
            }
            Ok(_) => {}
            Err(task) => {
                tracing::debug!(task = task.id, name = task.name, role = role.name(), "role stopped, dropping task");
            }
        }
    }

    /// Run a closure on `role` and wait for its result
    ///
    /// Runs inline when the caller already is `role`.
    ///
    /// # Panics
    /// If `role` is not running, if the call would deadlock (the target is
    /// itself parked in `call_sync` toward the caller), or if the task was
    /// dropped before completing.
    pub fn call_sync<F, R>(&self, role: Role, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_on(role) {
            return f();
        }

        let target = self.context(role);
        if target.state() != RoleState::Running {
            usage_violation(format_args!(
                "call_sync into the {role} thread while it is {:?}",
                target.state()
            ));
        }

        // Publish our own flag before reading the target's. With both sides
        // using SeqCst, two threads calling into each other cannot both miss
        // the other's flag.
        let blocked = self.current_role().map(|r| BlockedInSync::enter(self.context(r)));
        if blocked.is_some() && target.is_blocked_in_sync() {
            drop(blocked);
            usage_violation(format_args!(
                "call_sync into the {role} thread, which is blocked in call_sync toward this thread"
            ));
        }

        let (task, completion) = Task::with_result(role, std::any::type_name::<F>(), f);
        self.post_task(task);

        match completion.wait() {
            Some(value) => value,
            None => panic!("call_sync task on the {role} thread was dropped before completing"),
        }
    }

    /// Install the per-iteration idle callback for `role`
    pub fn register_idle(&self, role: Role, hook: Hook) {
        self.context(role).set_idle(hook);
    }

    /// Install the per-iteration native message pump for `role`
    pub fn register_pump(&self, role: Role, hook: Hook) {
        self.context(role).set_pump(hook);
    }

    /// Run one loop iteration: idle hook, queued tasks, message pump
    ///
    /// Returns the number of tasks executed.
    pub fn run_once(&self, role: Role) -> usize {
        self.assert_on(role, "run_once");
        let ctx = self.context(role);

        ctx.run_idle();

        let batch = ctx.take_batch();
        let count = batch.len();
        for task in batch {
            tracing::trace!(task = task.id, name = task.name, role = role.name(), age = ?task.age(), "run");
            task.run();
            ctx.mark_executed();
        }

        ctx.run_pump();
        ctx.mark_iteration();
        count
    }

    /// Run the loop until `quit(role)` is requested
    pub fn run(&self, role: Role) {
        let ctx = self.context(role);
        tracing::debug!(role = role.name(), "run loop started");

        while !ctx.quit_requested() {
            self.run_once(role);
            ctx.park(self.idle_interval);
        }

        tracing::debug!(role = role.name(), "run loop finished");
    }

    /// Ask the loop of `role` to exit after its current iteration
    pub fn quit(&self, role: Role) {
        self.context(role).request_quit();
    }

    /// Mark `role` stopped, dropping queued tasks and hooks
    pub fn stop(&self, role: Role) {
        let dropped = self.context(role).stop();
        if dropped > 0 {
            tracing::debug!(role = role.name(), dropped, "dropped queued tasks at stop");
        }
    }

    /// Tasks waiting on `role`
    pub fn pending(&self, role: Role) -> usize {
        self.context(role).pending()
    }

    /// Statistics for `role`
    pub fn stats(&self, role: Role) -> RoleStats {
        self.context(role).stats()
    }
}

/// Marks a role as parked in `call_sync` for the guard's lifetime
struct BlockedInSync<'a>(&'a RoleContext);

impl<'a> BlockedInSync<'a> {
    fn enter(ctx: &'a RoleContext) -> Self {
        ctx.set_blocked_in_sync(true);
        Self(ctx)
    }
}

impl Drop for BlockedInSync<'_> {
    fn drop(&mut self) {
        self.0.set_blocked_in_sync(false);
    }
}

/// Stops a role when dropped, including during unwinding
pub(crate) struct StopOnExit<'a> {
    dispatcher: &'a Dispatcher,
    role: Role,
}

impl<'a> StopOnExit<'a> {
    pub(crate) fn new(dispatcher: &'a Dispatcher, role: Role) -> Self {
        Self { dispatcher, role }
    }
}

impl Drop for StopOnExit<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!(role = self.role.name(), "run loop terminated by panic");
        }
        self.dispatcher.stop(self.role);
    }
}

/// Thread-affinity and ordering misuse is never recoverable
#[cold]
#[track_caller]
pub(crate) fn usage_violation(message: std::fmt::Arguments<'_>) -> ! {
    tracing::error!("usage violation: {message}");
    panic!("usage violation: {message}");
}
