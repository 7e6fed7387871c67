//! Handle Registry
//!
//! Weak lookup from opaque handles to live objects.
//! - Monotonic handle allocation (handles are never reused)
//! - Unlocked lookups and guarded lookups that pin an entry
//! - Deconstruction that blocks until every guard has been released

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Opaque identifier for a registered object
///
/// A handle never owns its object. Copies may be held by any thread and
/// outlive the object; lookups through a stale handle return `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Handle(isize);

impl Handle {
    /// The null handle. Never allocated by a registry.
    pub const INVALID: Handle = Handle(0);

    /// Rebuild a handle from its raw value
    #[inline]
    pub const fn from_raw(raw: isize) -> Self {
        Handle(raw)
    }

    /// Raw pointer-width value
    #[inline]
    pub const fn raw(self) -> isize {
        self.0
    }

    /// Check if this handle could have come from a registry
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Live registry entry
struct Entry<T> {
    object: Arc<T>,
    /// One record per outstanding guard
    guards: Vec<ThreadId>,
}

struct Inner<T> {
    entries: HashMap<Handle, Entry<T>>,
    /// Deconstructed entries still pinned by guards
    retiring: HashMap<Handle, Vec<ThreadId>>,
    next: isize,
}

/// Thread-safe table of registered objects
pub struct HandleRegistry<T> {
    inner: Mutex<Inner<T>>,
    /// Signalled whenever a guard on a retiring entry is released
    released: Condvar,
}

impl<T> fmt::Debug for HandleRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("HandleRegistry")
            .field("live", &inner.entries.len())
            .field("retiring", &inner.retiring.len())
            .field("next", &inner.next)
            .finish()
    }
}

impl<T> HandleRegistry<T> {
    /// Create an empty registry. The first handle allocated is `1`.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                retiring: HashMap::new(),
                next: 1,
            }),
            released: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an object and return its fresh handle
    pub fn register(&self, object: T) -> Handle {
        self.register_with(|_| object)
    }

    /// Register an object that needs to know its own handle
    ///
    /// `build` runs under the registry lock and must not touch the registry.
    pub fn register_with<F>(&self, build: F) -> Handle
    where
        F: FnOnce(Handle) -> T,
    {
        let mut inner = self.lock();
        let handle = Handle(inner.next);
        inner.next += 1;

        let object = Arc::new(build(handle));
        inner.entries.insert(
            handle,
            Entry {
                object,
                guards: Vec::new(),
            },
        );
        handle
    }

    /// Unlocked lookup
    ///
    /// The returned pointer keeps the object's memory alive, but does not
    /// keep it registered: a concurrent `deconstruct` may still proceed.
    pub fn get(&self, handle: Handle) -> Option<Arc<T>> {
        self.lock()
            .entries
            .get(&handle)
            .map(|entry| Arc::clone(&entry.object))
    }

    /// Guarded lookup
    ///
    /// While the returned guard is alive, `deconstruct` on this handle
    /// will not return.
    pub fn get_locked(&self, handle: Handle) -> Option<HandleGuard<'_, T>> {
        let owner = thread::current().id();
        let mut inner = self.lock();
        let entry = inner.entries.get_mut(&handle)?;
        entry.guards.push(owner);

        Some(HandleGuard {
            registry: self,
            handle,
            owner,
            object: Arc::clone(&entry.object),
            _not_send: PhantomData,
        })
    }

    /// Release a guard obtained from `get_locked`
    ///
    /// Dropping the guard has the same effect.
    pub fn unlock(&self, guard: HandleGuard<'_, T>) {
        debug_assert!(std::ptr::eq(guard.registry, self), "guard from another registry");
        drop(guard);
    }

    fn release(&self, handle: Handle, owner: ThreadId) {
        let mut inner = self.lock();

        if let Some(entry) = inner.entries.get_mut(&handle) {
            remove_one(&mut entry.guards, owner);
            return;
        }

        if let Some(guards) = inner.retiring.get_mut(&handle) {
            remove_one(guards, owner);
            if guards.is_empty() {
                self.released.notify_all();
            }
        }
    }

    /// Remove a handle so all later lookups return `None`
    ///
    /// Idempotent. If guards are outstanding, the mapping disappears at
    /// once but this call blocks until the last guard is released.
    ///
    /// # Panics
    /// If the calling thread itself holds a guard on `handle`, since
    /// waiting would never finish.
    pub fn deconstruct(&self, handle: Handle) {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.remove(&handle) else {
            return;
        };

        if entry.guards.is_empty() {
            drop(inner);
            drop(entry);
            return;
        }

        let me = thread::current().id();
        if entry.guards.contains(&me) {
            inner.entries.insert(handle, entry);
            drop(inner);
            panic!("deconstruct({handle}) called while this thread holds a guard on it");
        }

        tracing::debug!(
            %handle,
            guards = entry.guards.len(),
            "waiting for guards before reclaiming handle"
        );
        let Entry { object, guards } = entry;
        inner.retiring.insert(handle, guards);

        let mut inner = self
            .released
            .wait_while(inner, |inner| {
                inner
                    .retiring
                    .get(&handle)
                    .is_some_and(|guards| !guards.is_empty())
            })
            .unwrap_or_else(PoisonError::into_inner);
        inner.retiring.remove(&handle);
        drop(inner);
        drop(object);
    }

    /// Check if a handle is currently registered
    pub fn contains(&self, handle: Handle) -> bool {
        self.lock().entries.contains_key(&handle)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Check if no entries are live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outstanding guards on a live handle
    pub fn guard_count(&self, handle: Handle) -> usize {
        self.lock()
            .entries
            .get(&handle)
            .map_or(0, |entry| entry.guards.len())
    }
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_one(guards: &mut Vec<ThreadId>, owner: ThreadId) {
    if let Some(pos) = guards.iter().position(|id| *id == owner) {
        guards.swap_remove(pos);
    }
}

/// Pin on a registry entry, returned by `HandleRegistry::get_locked`
///
/// A guard is recorded against the thread that took it, so it cannot
/// leave that thread:
///
/// ```compile_fail
/// fn assert_send<T: Send>() {}
/// assert_send::<fos_embed::HandleGuard<'static, u8>>();
/// ```
pub struct HandleGuard<'a, T> {
    registry: &'a HandleRegistry<T>,
    handle: Handle,
    owner: ThreadId,
    object: Arc<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> HandleGuard<'_, T> {
    /// Handle this guard pins
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Shared pointer to the guarded object
    pub fn object(&self) -> &Arc<T> {
        &self.object
    }
}

impl<T> Deref for HandleGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.object
    }
}

impl<T> Drop for HandleGuard<'_, T> {
    fn drop(&mut self) {
        self.registry.release(self.handle, self.owner);
    }
}

impl<T> fmt::Debug for HandleGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleGuard")
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_register_get_deconstruct() {
        let registry = HandleRegistry::new();

        let h1 = registry.register("A");
        assert_eq!(h1, Handle::from_raw(1));
        assert_eq!(registry.get(h1).as_deref(), Some(&"A"));

        registry.deconstruct(h1);
        assert!(registry.get(h1).is_none());
        assert!(registry.get_locked(h1).is_none());
    }

    #[test]
    fn test_deconstruct_is_idempotent() {
        let registry = HandleRegistry::new();
        let h = registry.register(7u32);

        registry.deconstruct(h);
        registry.deconstruct(h);
        registry.deconstruct(Handle::from_raw(999));

        assert!(registry.get(h).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handles_are_never_reused() {
        let registry = HandleRegistry::new();
        let a = registry.register(1);
        registry.deconstruct(a);
        let b = registry.register(2);

        assert_ne!(a, b);
        assert!(b > a);
        assert!(registry.get(a).is_none());
        assert_eq!(registry.get(b).as_deref(), Some(&2));
    }

    #[test]
    fn test_register_with_sees_own_handle() {
        let registry = HandleRegistry::new();
        let h = registry.register_with(|handle| handle.raw() * 10);

        assert_eq!(registry.get(h).as_deref(), Some(&(h.raw() * 10)));
    }

    #[test]
    fn test_guard_counting() {
        let registry = HandleRegistry::new();
        let h = registry.register(String::from("page"));

        let g1 = registry.get_locked(h).unwrap();
        let g2 = registry.get_locked(h).unwrap();
        assert_eq!(registry.guard_count(h), 2);
        assert_eq!(g1.as_str(), "page");

        registry.unlock(g1);
        assert_eq!(registry.guard_count(h), 1);
        drop(g2);
        assert_eq!(registry.guard_count(h), 0);
    }

    #[test]
    fn test_deconstruct_waits_for_guard() {
        let registry = Arc::new(HandleRegistry::new());
        let h = registry.register(5u8);

        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let holder = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let guard = registry.get_locked(h).unwrap();
                locked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                drop(guard);
            })
        };
        locked_rx.recv().unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let destroyer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                registry.deconstruct(h);
                done_tx.send(()).unwrap();
            })
        };

        // Lookups fail as soon as deconstruction starts, but it cannot finish.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while registry.contains(h) {
            assert!(std::time::Instant::now() < deadline, "deconstruct never started");
            thread::yield_now();
        }
        assert!(registry.get(h).is_none());
        assert!(done_rx.recv_timeout(Duration::from_millis(20)).is_err());

        release_tx.send(()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        holder.join().unwrap();
        destroyer.join().unwrap();
    }

    #[test]
    #[should_panic(expected = "holds a guard")]
    fn test_deconstruct_with_own_guard_panics() {
        let registry = HandleRegistry::new();
        let h = registry.register(1);
        let _guard = registry.get_locked(h).unwrap();
        registry.deconstruct(h);
    }
}
