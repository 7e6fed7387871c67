//! Headless Backend
//!
//! In-process engine stand-in: no network, no rendering. Documents are
//! served from an in-memory table, script is a handful of expressions, and
//! page events are queued until the next `pump`.

use std::collections::{HashMap, VecDeque};

use url::Url;

use super::backend::{
    BackendError, ConsoleLevel, ConsoleMessage, EngineBackend, JsQuery, JsValue, LoadResult,
    NavigationKind, ViewOptions,
};
use crate::handle::Handle;
use crate::marshal::EventSink;

/// Frame id reported for the main frame's script context
const MAIN_FRAME_ID: i64 = 1;

const BLANK: &str = "about:blank";

/// Page event waiting for the next pump
#[derive(Debug)]
enum PageEvent {
    Navigation(NavigationKind, String),
    LoadBegin(String),
    UrlChanged(String),
    TitleChanged(String),
    ScriptContextCreated(i64),
    DocumentReady,
    LoadEnd(String, LoadResult),
    Console(ConsoleMessage),
    JsQuery(JsQuery),
}

/// History entry
#[derive(Debug, Clone)]
struct Entry {
    url: String,
    title: String,
}

struct Page {
    events: EventSink,
    options: ViewOptions,
    history: Vec<Entry>,
    /// Index of the current entry, `None` before the first load
    current: Option<usize>,
    pending: VecDeque<PageEvent>,
    next_query_id: i64,
    /// Host replies to js queries, by query id
    responses: HashMap<i64, String>,
}

impl Page {
    fn new(options: &ViewOptions, events: EventSink) -> Self {
        Self {
            events,
            options: options.clone(),
            history: Vec::new(),
            current: None,
            pending: VecDeque::new(),
            next_query_id: 1,
            responses: HashMap::new(),
        }
    }

    fn current_entry(&self) -> Option<&Entry> {
        self.current.and_then(|index| self.history.get(index))
    }

    /// Push a new entry, truncating forward history
    fn push_entry(&mut self, entry: Entry) {
        if let Some(index) = self.current {
            self.history.truncate(index + 1);
        }
        self.history.push(entry);
        self.current = Some(self.history.len() - 1);
    }

    /// Queue the event sequence of a committed load
    fn commit(&mut self, kind: NavigationKind) {
        let Some(entry) = self.current_entry().cloned() else {
            return;
        };

        self.pending.push_back(PageEvent::Navigation(kind, entry.url.clone()));
        self.pending.push_back(PageEvent::LoadBegin(entry.url.clone()));
        self.pending.push_back(PageEvent::UrlChanged(entry.url.clone()));
        self.pending.push_back(PageEvent::TitleChanged(entry.title.clone()));
        if self.options.enable_javascript {
            self.pending.push_back(PageEvent::ScriptContextCreated(MAIN_FRAME_ID));
        }
        self.pending.push_back(PageEvent::DocumentReady);
        self.pending.push_back(PageEvent::LoadEnd(entry.url, LoadResult::Succeeded));
    }

    fn flush(&mut self) {
        while let Some(event) = self.pending.pop_front() {
            let sink = &self.events;
            match event {
                PageEvent::Navigation(kind, url) => sink.navigation(kind, &url),
                PageEvent::LoadBegin(url) => sink.load_begin(&url),
                PageEvent::UrlChanged(url) => sink.url_changed(&url),
                PageEvent::TitleChanged(title) => sink.title_changed(&title),
                PageEvent::ScriptContextCreated(frame_id) => sink.script_context_created(frame_id),
                PageEvent::DocumentReady => sink.document_ready(),
                PageEvent::LoadEnd(url, result) => sink.load_end(&url, result),
                PageEvent::Console(msg) => sink.console(msg.level, &msg.message, &msg.source, msg.line),
                PageEvent::JsQuery(query) => sink.js_query(query.query_id, query.custom_msg, &query.request),
            }
        }
    }

    fn source(&self) -> String {
        self.current_entry()
            .map(|entry| entry.url.clone())
            .unwrap_or_else(|| BLANK.to_string())
    }

    fn evaluate(&mut self, script: &str) -> JsValue {
        let expr = script.trim().trim_end_matches(';').trim();

        if let Some(arg) = call_args(expr, "console.log") {
            let value = self.evaluate(arg);
            let message = ConsoleMessage {
                level: ConsoleLevel::Log,
                message: value.to_string(),
                source: self.source(),
                line: 1,
            };
            self.pending.push_back(PageEvent::Console(message));
            return JsValue::Undefined;
        }

        if let Some(args) = call_args(expr, "fosQuery") {
            let Some((msg, request)) = args.split_once(',') else {
                return JsValue::Error("fosQuery expects (number, string)".into());
            };
            let custom_msg = match msg.trim().parse::<i32>() {
                Ok(n) => n,
                Err(_) => return JsValue::Error(format!("invalid message number: {}", msg.trim())),
            };
            let request = match self.evaluate(request) {
                JsValue::String(s) => s,
                other => other.to_string(),
            };
            let query_id = self.next_query_id;
            self.next_query_id += 1;
            self.pending.push_back(PageEvent::JsQuery(JsQuery {
                query_id,
                custom_msg,
                request,
            }));
            return JsValue::Number(query_id as f64);
        }

        if let Some(arg) = call_args(expr, "fosResponse") {
            return match arg.trim().parse::<i64>() {
                Ok(id) => self
                    .responses
                    .get(&id)
                    .map_or(JsValue::Null, |s| JsValue::String(s.clone())),
                Err(_) => JsValue::Error(format!("invalid query id: {}", arg.trim())),
            };
        }

        match expr {
            "" | "undefined" => JsValue::Undefined,
            "null" => JsValue::Null,
            "true" => JsValue::Boolean(true),
            "false" => JsValue::Boolean(false),
            "document.title" => JsValue::String(
                self.current_entry()
                    .map(|entry| entry.title.clone())
                    .unwrap_or_default(),
            ),
            "location.href" => JsValue::String(self.source()),
            "navigator.userAgent" => JsValue::String(self.options.user_agent.clone()),
            _ => {
                if let Some(s) = string_literal(expr) {
                    JsValue::String(s.to_string())
                } else if let Ok(n) = expr.parse::<f64>() {
                    JsValue::Number(n)
                } else {
                    JsValue::Error(format!("unsupported expression: {expr}"))
                }
            }
        }
    }
}

/// `name(args)` -> `args`
fn call_args<'a>(expr: &'a str, name: &str) -> Option<&'a str> {
    expr.strip_prefix(name)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn string_literal(expr: &str) -> Option<&str> {
    let expr = expr.trim();
    expr.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| expr.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
}

/// Text of the first `<title>` element, whitespace-collapsed
fn extract_title(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let Some(open) = lower.find("<title") else {
        return String::new();
    };
    let Some(start) = lower[open..].find('>').map(|i| open + i + 1) else {
        return String::new();
    };
    let end = lower[start..].find("</title").map_or(html.len(), |i| start + i);

    html[start..end].split_whitespace().collect::<Vec<_>>().join(" ")
}

/// In-process engine with an in-memory document table
#[derive(Default)]
pub struct HeadlessBackend {
    pages: HashMap<Handle, Page>,
    /// Documents served by `load_url`, keyed by serialized URL
    documents: HashMap<String, String>,
    /// Refuse view creation beyond this many live views
    view_limit: Option<usize>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `html` for `url`
    pub fn with_document(mut self, url: &Url, html: impl Into<String>) -> Self {
        self.documents.insert(url.as_str().to_string(), html.into());
        self
    }

    /// Fail `create_view` once `limit` views are live
    pub fn with_view_limit(mut self, limit: usize) -> Self {
        self.view_limit = Some(limit);
        self
    }

    /// Number of live views
    pub fn view_count(&self) -> usize {
        self.pages.len()
    }

    fn page(&mut self, view: Handle) -> Option<&mut Page> {
        let page = self.pages.get_mut(&view);
        if page.is_none() {
            tracing::warn!(%view, "headless backend has no page for view");
        }
        page
    }
}

impl EngineBackend for HeadlessBackend {
    fn pump(&mut self) {
        for page in self.pages.values_mut() {
            page.flush();
        }
    }

    fn create_view(
        &mut self,
        view: Handle,
        options: &ViewOptions,
        events: EventSink,
    ) -> Result<(), BackendError> {
        if let Some(limit) = self.view_limit {
            if self.pages.len() >= limit {
                return Err(BackendError::CreateView(format!("view limit of {limit} reached")));
            }
        }
        self.pages.insert(view, Page::new(options, events));
        tracing::debug!(%view, "headless page created");
        Ok(())
    }

    fn destroy_view(&mut self, view: Handle) {
        if self.pages.remove(&view).is_some() {
            tracing::debug!(%view, "headless page destroyed");
        }
    }

    fn load_url(&mut self, view: Handle, url: &Url) {
        let document = self.documents.get(url.as_str()).cloned();
        let Some(page) = self.page(view) else {
            return;
        };

        let url = url.to_string();
        match document {
            Some(html) => {
                page.push_entry(Entry {
                    url,
                    title: extract_title(&html),
                });
                page.commit(NavigationKind::Other);
            }
            None => {
                page.pending.push_back(PageEvent::LoadBegin(url.clone()));
                let reason = format!("no document for {url}");
                page.pending.push_back(PageEvent::LoadEnd(url, LoadResult::Failed { reason }));
            }
        }
    }

    fn load_html(&mut self, view: Handle, html: &str, base_url: Option<&Url>) {
        let Some(page) = self.page(view) else {
            return;
        };
        page.push_entry(Entry {
            url: base_url.map_or_else(|| BLANK.to_string(), Url::to_string),
            title: extract_title(html),
        });
        page.commit(NavigationKind::Other);
    }

    fn reload(&mut self, view: Handle) {
        if let Some(page) = self.page(view) {
            page.commit(NavigationKind::Reload);
        }
    }

    fn stop_loading(&mut self, view: Handle) {
        let Some(page) = self.page(view) else {
            return;
        };
        for event in page.pending.iter_mut() {
            if let PageEvent::LoadEnd(_, result) = event {
                *result = LoadResult::Canceled;
            }
        }
    }

    fn go_back(&mut self, view: Handle) -> bool {
        let Some(page) = self.page(view) else {
            return false;
        };
        match page.current {
            Some(index) if index > 0 => {
                page.current = Some(index - 1);
                page.commit(NavigationKind::BackForward);
                true
            }
            _ => false,
        }
    }

    fn go_forward(&mut self, view: Handle) -> bool {
        let Some(page) = self.page(view) else {
            return false;
        };
        match page.current {
            Some(index) if index + 1 < page.history.len() => {
                page.current = Some(index + 1);
                page.commit(NavigationKind::BackForward);
                true
            }
            _ => false,
        }
    }

    fn can_go_back(&self, view: Handle) -> bool {
        self.pages
            .get(&view)
            .and_then(|page| page.current)
            .is_some_and(|index| index > 0)
    }

    fn can_go_forward(&self, view: Handle) -> bool {
        self.pages
            .get(&view)
            .is_some_and(|page| page.current.is_some_and(|index| index + 1 < page.history.len()))
    }

    fn run_js(&mut self, view: Handle, script: &str) -> JsValue {
        let Some(page) = self.page(view) else {
            return JsValue::Undefined;
        };
        if !page.options.enable_javascript {
            return JsValue::Error("JavaScript is disabled".into());
        }
        page.evaluate(script)
    }

    fn url(&self, view: Handle) -> Option<String> {
        let page = self.pages.get(&view)?;
        page.current_entry().map(|entry| entry.url.clone())
    }

    fn title(&self, view: Handle) -> Option<String> {
        let page = self.pages.get(&view)?;
        page.current_entry().map(|entry| entry.title.clone())
    }

    fn set_user_agent(&mut self, view: Handle, user_agent: &str) {
        if let Some(page) = self.page(view) {
            page.options.user_agent = user_agent.to_string();
        }
    }

    fn respond_js_query(&mut self, view: Handle, query_id: i64, custom_msg: i32, response: &str) {
        if let Some(page) = self.page(view) {
            tracing::debug!(%view, query_id, custom_msg, "js query answered");
            page.responses.insert(query_id, response.to_string());
        }
    }
}
