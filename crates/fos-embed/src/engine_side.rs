//! Engine-thread state
//!
//! The backend is not `Send`; it lives in a thread-local installed by the
//! engine thread at start-up and dropped when its run loop exits.

use std::cell::RefCell;
use std::collections::HashSet;

use crate::handle::Handle;
use crate::interface::{BackendError, EngineBackend, ViewOptions};
use crate::marshal::EventSink;
use crate::thread::usage_violation;

struct EngineSide {
    backend: Box<dyn EngineBackend>,
    /// Views whose engine-side creation succeeded
    views: HashSet<Handle>,
}

thread_local! {
    static ENGINE: RefCell<Option<EngineSide>> = const { RefCell::new(None) };
}

fn with_side<R>(f: impl FnOnce(&mut EngineSide) -> R) -> Option<R> {
    ENGINE.with(|cell| {
        let Ok(mut slot) = cell.try_borrow_mut() else {
            usage_violation(format_args!("engine backend re-entered from one of its own callbacks"));
        };
        slot.as_mut().map(f)
    })
}

/// Install the backend on the current (engine) thread
pub(crate) fn install(backend: Box<dyn EngineBackend>) {
    ENGINE.with(|cell| {
        *cell.borrow_mut() = Some(EngineSide {
            backend,
            views: HashSet::new(),
        });
    });
}

/// Tear down remaining views and drop the backend
pub(crate) fn uninstall() {
    let side = ENGINE.with(|cell| cell.borrow_mut().take());
    if let Some(mut side) = side {
        for view in side.views.drain() {
            side.backend.destroy_view(view);
        }
        tracing::debug!("engine backend dropped");
    }
}

/// Idle hook body: let the engine run its internal queues
pub(crate) fn pump() {
    with_side(|side| side.backend.pump());
}

pub(crate) fn create_view(
    view: Handle,
    options: &ViewOptions,
    events: EventSink,
) -> Result<(), BackendError> {
    with_side(|side| {
        side.backend.create_view(view, options, events)?;
        side.views.insert(view);
        Ok(())
    })
    .unwrap_or_else(|| Err(BackendError::Unavailable("engine backend not installed".into())))
}

/// Free engine-side state; returns false if the view never got that far
pub(crate) fn destroy_view(view: Handle) -> bool {
    with_side(|side| {
        let existed = side.views.remove(&view);
        if existed {
            side.backend.destroy_view(view);
        }
        existed
    })
    .unwrap_or(false)
}

/// Run `f` against the backend if `view` exists engine-side
pub(crate) fn with_view<R>(view: Handle, f: impl FnOnce(&mut dyn EngineBackend) -> R) -> Option<R> {
    with_side(|side| {
        if side.views.contains(&view) {
            Some(f(side.backend.as_mut()))
        } else {
            None
        }
    })
    .flatten()
}
