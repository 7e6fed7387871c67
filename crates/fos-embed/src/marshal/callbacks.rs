//! Callback Closure Table
//!
//! Host listeners registered on a view, one slot per event kind.
//! Registration replaces a slot whole; the last registration wins.

use std::sync::Arc;

use crate::handle::Handle;
use crate::interface::{ConsoleMessage, JsQuery, LoadResult, NavigationKind};
use crate::view::WebView;

/// Listener receiving one string (title, URL)
pub trait TextListener: Send + Sync {
    fn on_text(&self, view: Handle, text: &str);
}

impl<F> TextListener for F
where
    F: Fn(Handle, &str) + Send + Sync,
{
    fn on_text(&self, view: Handle, text: &str) {
        self(view, text)
    }
}

/// Navigation notifications
pub trait NavigationListener: Send + Sync {
    fn on_navigation(&self, view: Handle, kind: NavigationKind, url: &str);
}

impl<F> NavigationListener for F
where
    F: Fn(Handle, NavigationKind, &str) + Send + Sync,
{
    fn on_navigation(&self, view: Handle, kind: NavigationKind, url: &str) {
        self(view, kind, url)
    }
}

pub trait LoadEndListener: Send + Sync {
    fn on_load_end(&self, view: Handle, url: &str, result: &LoadResult);
}

impl<F> LoadEndListener for F
where
    F: Fn(Handle, &str, &LoadResult) + Send + Sync,
{
    fn on_load_end(&self, view: Handle, url: &str, result: &LoadResult) {
        self(view, url, result)
    }
}

/// Listener with no payload
pub trait ViewListener: Send + Sync {
    fn on_view(&self, view: Handle);
}

impl<F> ViewListener for F
where
    F: Fn(Handle) + Send + Sync,
{
    fn on_view(&self, view: Handle) {
        self(view)
    }
}

/// New script context; receives the frame id
pub trait ScriptContextListener: Send + Sync {
    fn on_script_context(&self, view: Handle, frame_id: i64);
}

impl<F> ScriptContextListener for F
where
    F: Fn(Handle, i64) + Send + Sync,
{
    fn on_script_context(&self, view: Handle, frame_id: i64) {
        self(view, frame_id)
    }
}

/// Page-to-host queries
pub trait JsQueryListener: Send + Sync {
    fn on_js_query(&self, view: Handle, query: &JsQuery);
}

impl<F> JsQueryListener for F
where
    F: Fn(Handle, &JsQuery) + Send + Sync,
{
    fn on_js_query(&self, view: Handle, query: &JsQuery) {
        self(view, query)
    }
}

pub trait ConsoleListener: Send + Sync {
    fn on_console(&self, view: Handle, message: &ConsoleMessage);
}

impl<F> ConsoleListener for F
where
    F: Fn(Handle, &ConsoleMessage) + Send + Sync,
{
    fn on_console(&self, view: Handle, message: &ConsoleMessage) {
        self(view, message)
    }
}

/// Destruction notice
///
/// Runs after the handle stopped resolving. `object` is the view being
/// torn down, still readable for the duration of the call.
pub trait DestroyListener: Send + Sync {
    fn on_destroy(&self, view: Handle, object: &WebView);
}

impl<F> DestroyListener for F
where
    F: Fn(Handle, &WebView) + Send + Sync,
{
    fn on_destroy(&self, view: Handle, object: &WebView) {
        self(view, object)
    }
}

/// Event kinds a view can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TitleChanged,
    UrlChanged,
    Navigation,
    LoadBegin,
    LoadEnd,
    DocumentReady,
    ScriptContextCreated,
    JsQuery,
    Console,
    Destroy,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        Self::TitleChanged,
        Self::UrlChanged,
        Self::Navigation,
        Self::LoadBegin,
        Self::LoadEnd,
        Self::DocumentReady,
        Self::ScriptContextCreated,
        Self::JsQuery,
        Self::Console,
        Self::Destroy,
    ];
}

/// Listener slots of one view
#[derive(Default)]
pub struct CallbackTable {
    pub(crate) title_changed: Option<Arc<dyn TextListener>>,
    pub(crate) url_changed: Option<Arc<dyn TextListener>>,
    pub(crate) navigation: Option<Arc<dyn NavigationListener>>,
    pub(crate) load_begin: Option<Arc<dyn TextListener>>,
    pub(crate) load_end: Option<Arc<dyn LoadEndListener>>,
    pub(crate) document_ready: Option<Arc<dyn ViewListener>>,
    pub(crate) script_context_created: Option<Arc<dyn ScriptContextListener>>,
    pub(crate) js_query: Option<Arc<dyn JsQueryListener>>,
    pub(crate) console: Option<Arc<dyn ConsoleListener>>,
    pub(crate) destroy: Option<Arc<dyn DestroyListener>>,
}

impl CallbackTable {
    /// Check if a listener is installed for `kind`
    pub fn is_registered(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::TitleChanged => self.title_changed.is_some(),
            EventKind::UrlChanged => self.url_changed.is_some(),
            EventKind::Navigation => self.navigation.is_some(),
            EventKind::LoadBegin => self.load_begin.is_some(),
            EventKind::LoadEnd => self.load_end.is_some(),
            EventKind::DocumentReady => self.document_ready.is_some(),
            EventKind::ScriptContextCreated => self.script_context_created.is_some(),
            EventKind::JsQuery => self.js_query.is_some(),
            EventKind::Console => self.console.is_some(),
            EventKind::Destroy => self.destroy.is_some(),
        }
    }

    /// Kinds with a listener installed
    pub fn registered(&self) -> Vec<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|kind| self.is_registered(*kind))
            .collect()
    }
}

impl std::fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackTable")
            .field("registered", &self.registered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_empty_table() {
        let table = CallbackTable::default();
        assert!(table.registered().is_empty());
    }

    #[test]
    fn test_last_registration_wins() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut table = CallbackTable::default();

        let first = Arc::clone(&seen);
        table.title_changed = Some(Arc::new(move |_: Handle, title: &str| {
            first.lock().unwrap().push(format!("first:{title}"))
        }));
        let second = Arc::clone(&seen);
        table.title_changed = Some(Arc::new(move |_: Handle, title: &str| {
            second.lock().unwrap().push(format!("second:{title}"))
        }));

        let listener = table.title_changed.clone().unwrap();
        listener.on_text(Handle::from_raw(1), "Home");

        assert_eq!(*seen.lock().unwrap(), vec!["second:Home".to_string()]);
        assert_eq!(table.registered(), vec![EventKind::TitleChanged]);
    }

    /// Named listener type, not a closure
    struct Counter(Mutex<u32>);

    impl ConsoleListener for Counter {
        fn on_console(&self, _view: Handle, _message: &ConsoleMessage) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_struct_and_closure_listeners_share_slots() {
        let counter = Arc::new(Counter(Mutex::new(0)));
        let mut table = CallbackTable::default();
        table.console = Some(Arc::clone(&counter) as Arc<dyn ConsoleListener>);
        table.document_ready = Some(Arc::new(|_: Handle| {}));

        let message = ConsoleMessage {
            level: crate::interface::ConsoleLevel::Log,
            message: "hello".into(),
            source: "page.js".into(),
            line: 3,
        };
        let listener = table.console.clone().unwrap();
        listener.on_console(Handle::from_raw(1), &message);
        listener.on_console(Handle::from_raw(1), &message);

        assert_eq!(*counter.0.lock().unwrap(), 2);
        assert_eq!(
            table.registered(),
            vec![EventKind::DocumentReady, EventKind::Console]
        );
    }
}
