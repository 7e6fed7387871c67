//! Web View
//!
//! UI-side half of an engine page. Owned by the handle registry; the engine
//! keeps its own state for the same handle on the engine thread.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::handle::Handle;
use crate::marshal::{CallbackTable, EventKind};

/// Lifecycle state of a view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ViewState {
    /// Registered; engine-side initialisation pending
    Creating = 0,
    /// Engine page initialised; events are forwarded
    Created = 1,
    /// Unregistered; engine-side teardown pending
    Destroying = 2,
    /// Engine-side state freed
    Gone = 3,
}

impl ViewState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Creating,
            1 => Self::Created,
            2 => Self::Destroying,
            _ => Self::Gone,
        }
    }
}

/// Registered view object
pub struct WebView {
    handle: Handle,
    state: AtomicU8,
    listeners: Mutex<CallbackTable>,
    created: Instant,
}

impl WebView {
    pub(crate) fn new(handle: Handle) -> Self {
        Self {
            handle,
            state: AtomicU8::new(ViewState::Creating as u8),
            listeners: Mutex::new(CallbackTable::default()),
            created: Instant::now(),
        }
    }

    fn table(&self) -> MutexGuard<'_, CallbackTable> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle this view is registered under
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Current lifecycle state
    pub fn state(&self) -> ViewState {
        ViewState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ViewState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move `from -> to`; fails if the view is no longer in `from`
    pub(crate) fn advance(&self, from: ViewState, to: ViewState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Time since construction
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Check if a listener is installed for `kind`
    pub fn is_listening(&self, kind: EventKind) -> bool {
        self.table().is_registered(kind)
    }

    /// Clone one listener slot out of the table
    pub(crate) fn listener<L: ?Sized>(&self, select: fn(&CallbackTable) -> Option<Arc<L>>) -> Option<Arc<L>> {
        select(&self.table())
    }

    pub(crate) fn update_listeners(&self, update: impl FnOnce(&mut CallbackTable)) {
        update(&mut self.table());
    }
}

impl std::fmt::Debug for WebView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebView")
            .field("handle", &self.handle)
            .field("state", &self.state())
            .field("listeners", &*self.table())
            .finish()
    }
}
