//! Event Trampolines
//!
//! Engine events carry borrowed data that dies with the callback. The sink
//! copies it, hops to the UI thread, and re-validates the view there before
//! any host listener sees it.

use std::sync::Arc;

use crate::engine_side;
use crate::handle::Handle;
use crate::interface::{ConsoleLevel, ConsoleMessage, EngineBackend, JsQuery, LoadResult, NavigationKind};
use crate::runtime::Shared;
use crate::thread::Role;
use crate::view::ViewState;

use super::{CallbackTable, EventKind};

/// Picks one listener slot out of a table
pub(crate) type Select<L> = fn(&CallbackTable) -> Option<Arc<L>>;
/// Calls a listener with an owned payload
pub(crate) type Invoke<L, P> = fn(&L, Handle, P);

/// Engine-side event entry point for one view
///
/// Handed to the backend in `create_view`. Every method copies its
/// arguments before returning, so callers may pass engine-owned buffers.
#[derive(Clone)]
pub struct EventSink {
    shared: Arc<Shared>,
    view: Handle,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").field("view", &self.view).finish()
    }
}

impl EventSink {
    pub(crate) fn new(shared: Arc<Shared>, view: Handle) -> Self {
        Self { shared, view }
    }

    /// View this sink reports for
    pub fn view(&self) -> Handle {
        self.view
    }

    pub fn title_changed(&self, title: &str) {
        self.forward(
            EventKind::TitleChanged,
            title.to_owned(),
            |t: &CallbackTable| t.title_changed.clone(),
            |listener, view, title: String| listener.on_text(view, &title),
        );
    }

    pub fn url_changed(&self, url: &str) {
        self.forward(
            EventKind::UrlChanged,
            url.to_owned(),
            |t: &CallbackTable| t.url_changed.clone(),
            |listener, view, url: String| listener.on_text(view, &url),
        );
    }

    pub fn navigation(&self, kind: NavigationKind, url: &str) {
        self.forward(
            EventKind::Navigation,
            (kind, url.to_owned()),
            |t: &CallbackTable| t.navigation.clone(),
            |listener, view, (kind, url): (NavigationKind, String)| listener.on_navigation(view, kind, &url),
        );
    }

    pub fn load_begin(&self, url: &str) {
        self.forward(
            EventKind::LoadBegin,
            url.to_owned(),
            |t: &CallbackTable| t.load_begin.clone(),
            |listener, view, url: String| listener.on_text(view, &url),
        );
    }

    pub fn load_end(&self, url: &str, result: LoadResult) {
        self.forward(
            EventKind::LoadEnd,
            (url.to_owned(), result),
            |t: &CallbackTable| t.load_end.clone(),
            |listener, view, (url, result): (String, LoadResult)| listener.on_load_end(view, &url, &result),
        );
    }

    pub fn document_ready(&self) {
        self.forward(
            EventKind::DocumentReady,
            (),
            |t: &CallbackTable| t.document_ready.clone(),
            |listener, view, ()| listener.on_view(view),
        );
    }

    pub fn script_context_created(&self, frame_id: i64) {
        self.forward(
            EventKind::ScriptContextCreated,
            frame_id,
            |t: &CallbackTable| t.script_context_created.clone(),
            |listener, view, frame_id: i64| listener.on_script_context(view, frame_id),
        );
    }

    pub fn js_query(&self, query_id: i64, custom_msg: i32, request: &str) {
        let query = JsQuery {
            query_id,
            custom_msg,
            request: request.to_owned(),
        };
        self.forward(
            EventKind::JsQuery,
            query,
            |t: &CallbackTable| t.js_query.clone(),
            |listener, view, query: JsQuery| listener.on_js_query(view, &query),
        );
    }

    pub fn console(&self, level: ConsoleLevel, message: &str, source: &str, line: u32) {
        let message = ConsoleMessage {
            level,
            message: message.to_owned(),
            source: source.to_owned(),
            line,
        };
        self.forward(
            EventKind::Console,
            message,
            |t: &CallbackTable| t.console.clone(),
            |listener, view, message: ConsoleMessage| listener.on_console(view, &message),
        );
    }

    fn forward<P, L>(&self, kind: EventKind, payload: P, select: Select<L>, invoke: Invoke<L, P>)
    where
        P: Send + 'static,
        L: ?Sized + Send + Sync + 'static,
    {
        let Some(view) = self.shared.views.get(self.view) else {
            tracing::debug!(view = %self.view, ?kind, "view gone before event left the engine");
            return;
        };
        if view.listener(select).is_none() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let handle = self.view;
        self.shared.dispatcher.post_async(Role::Ui, move || {
            deliver(&shared, handle, kind, payload, select, invoke);
        });
    }
}

/// UI-side half of an event hop
///
/// `payload` is dropped here on every path, after the listener (if any)
/// has seen it.
pub(crate) fn deliver<P, L>(
    shared: &Shared,
    handle: Handle,
    kind: EventKind,
    payload: P,
    select: Select<L>,
    invoke: Invoke<L, P>,
) where
    L: ?Sized,
{
    let Some(view) = shared.views.get(handle) else {
        tracing::debug!(view = %handle, ?kind, "view destroyed in flight, event dropped");
        return;
    };

    let state = view.state();
    if state != ViewState::Created {
        tracing::debug!(view = %handle, ?kind, ?state, "event outside the created window dropped");
        return;
    }

    if let Some(listener) = view.listener(select) {
        invoke(&*listener, handle, payload);
    }
}

/// Synchronous engine query with the same copy-then-revalidate rule
///
/// Returns `None` if the view is gone on either side of the hop.
pub(crate) fn query<R, F>(shared: &Arc<Shared>, view: Handle, op: F) -> Option<R>
where
    F: FnOnce(&mut dyn EngineBackend, Handle) -> R + Send + 'static,
    R: Send + 'static,
{
    shared.views.get(view)?;

    let engine_shared = Arc::clone(shared);
    let result = shared.dispatcher.call_sync(Role::Engine, move || {
        let Some(_guard) = engine_shared.views.get_locked(view) else {
            return None;
        };
        engine_side::with_view(view, |backend| op(backend, view))
    });

    if shared.views.contains(view) {
        result
    } else {
        None
    }
}

/// Asynchronous engine query answered on the UI thread
///
/// `reply` runs exactly once on the UI thread, with `None` if the view
/// was gone at any point of the round trip.
pub(crate) fn request<T, F, C>(shared: &Arc<Shared>, view: Handle, op: F, reply: C)
where
    F: FnOnce(&mut dyn EngineBackend, Handle) -> T + Send + 'static,
    C: FnOnce(Option<T>) + Send + 'static,
    T: Send + 'static,
{
    let engine_shared = Arc::clone(shared);
    shared.dispatcher.post_async(Role::Engine, move || {
        let answer = match engine_shared.views.get_locked(view) {
            Some(_guard) => engine_side::with_view(view, |backend| op(backend, view)),
            None => None,
        };

        let ui_shared = Arc::clone(&engine_shared);
        engine_shared.dispatcher.post_async(Role::Ui, move || {
            let answer = answer.filter(|_| ui_shared.views.contains(view));
            reply(answer);
        });
    });
}
