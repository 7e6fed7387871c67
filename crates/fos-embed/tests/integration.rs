//! Integration tests for fos-embed
//!
//! Drives a real runtime (UI = the test thread, engine = spawned) against
//! the headless backend and a call-recording backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use fos_embed::{
    BackendError, Config, EngineBackend, EventSink, Handle, HandleRegistry, HeadlessBackend,
    HistoryQuery, JsQuery, JsValue, LoadResult, Role, Runtime, ViewOptions, ViewState,
};
use url::Url;

fn config() -> Config {
    Config {
        idle_interval: Duration::from_millis(1),
        ..Config::default()
    }
}

fn headless(backend: impl FnOnce() -> HeadlessBackend + Send + 'static) -> Runtime {
    Runtime::init(config(), move || Ok(backend())).unwrap()
}

/// Pump the UI loop until `done` holds, failing after five seconds
fn pump_until(rt: &Runtime, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for the UI loop");
        rt.pump_ui();
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn created_view(rt: &Runtime) -> Handle {
    let view = rt.create_view();
    pump_until(rt, || rt.view_state(view) == Some(ViewState::Created));
    view
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

type Log = Arc<Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

// ============================================================================
// RECORDING BACKEND
// ============================================================================

/// Backend that only records which engine calls reached it
struct RecordingBackend {
    calls: Log,
}

impl RecordingBackend {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl EngineBackend for RecordingBackend {
    fn pump(&mut self) {}

    fn create_view(&mut self, view: Handle, _: &ViewOptions, _: EventSink) -> Result<(), BackendError> {
        self.record(format!("create {view}"));
        Ok(())
    }

    fn destroy_view(&mut self, view: Handle) {
        self.record(format!("destroy {view}"));
    }

    fn load_url(&mut self, view: Handle, url: &Url) {
        self.record(format!("load {view} {url}"));
    }

    fn load_html(&mut self, view: Handle, _: &str, _: Option<&Url>) {
        self.record(format!("load_html {view}"));
    }

    fn reload(&mut self, view: Handle) {
        self.record(format!("reload {view}"));
    }

    fn stop_loading(&mut self, _: Handle) {}

    fn go_back(&mut self, _: Handle) -> bool {
        false
    }

    fn go_forward(&mut self, _: Handle) -> bool {
        false
    }

    fn can_go_back(&self, _: Handle) -> bool {
        false
    }

    fn can_go_forward(&self, _: Handle) -> bool {
        false
    }

    fn run_js(&mut self, _: Handle, _: &str) -> JsValue {
        JsValue::Undefined
    }

    fn url(&self, _: Handle) -> Option<String> {
        None
    }

    fn title(&self, _: Handle) -> Option<String> {
        None
    }

    fn set_user_agent(&mut self, _: Handle, _: &str) {}

    fn respond_js_query(&mut self, _: Handle, _: i64, _: i32, _: &str) {}
}

fn recording() -> (Runtime, Log) {
    let calls = log();
    let backend_calls = Arc::clone(&calls);
    let rt = Runtime::init(config(), move || Ok(RecordingBackend { calls: backend_calls })).unwrap();
    (rt, calls)
}

// ============================================================================
// REGISTRY AND DISPATCHER SCENARIOS
// ============================================================================

#[test]
fn test_register_get_deconstruct() {
    let registry = HandleRegistry::new();
    let h1 = registry.register("A");

    assert_eq!(h1.raw(), 1);
    assert_eq!(registry.get(h1).as_deref(), Some(&"A"));

    registry.deconstruct(h1);
    assert!(registry.get(h1).is_none());
    registry.deconstruct(h1);
}

#[test]
fn test_posted_tasks_run_in_order() {
    let rt = headless(HeadlessBackend::new);
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 1..=5 {
        let order = Arc::clone(&order);
        rt.post_task(Role::Engine, move || order.lock().unwrap().push(i));
    }
    rt.call_sync(Role::Engine, || ());

    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_call_sync_write_is_visible() {
    let rt = headless(HeadlessBackend::new);
    let x = Arc::new(AtomicUsize::new(0));

    let target = Arc::clone(&x);
    rt.call_sync(Role::Engine, move || target.store(42, Ordering::SeqCst));

    assert_eq!(x.load(Ordering::SeqCst), 42);
}

#[test]
fn test_ui_idle_hook_runs_each_iteration() {
    let rt = headless(HeadlessBackend::new);
    let ticks = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&ticks);
    rt.register_ui_idle(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    rt.pump_ui();
    rt.pump_ui();

    assert_eq!(ticks.load(Ordering::SeqCst), 2);
    assert_eq!(rt.stats(Role::Ui).iterations, 2);
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[test]
fn test_destroy_races_in_flight_navigation() {
    let (rt, calls) = recording();

    // Hold the engine loop so nothing below runs before the destroy
    let (release_tx, release_rx) = mpsc::channel::<()>();
    rt.post_task(Role::Engine, move || {
        let _ = release_rx.recv();
    });

    let view = rt.create_view();
    rt.load_url(view, "https://example.com/").unwrap();
    rt.destroy_view(view);

    release_tx.send(()).unwrap();
    rt.call_sync(Role::Engine, || ());

    assert!(entries(&calls).is_empty());
    assert_eq!(rt.view_state(view), None);
}

#[test]
fn test_engine_calls_reach_backend_for_live_view() {
    let (rt, calls) = recording();
    let view = created_view(&rt);

    rt.load_url(view, "https://example.com/").unwrap();
    rt.reload(view);
    rt.destroy_view(view);
    rt.call_sync(Role::Engine, || ());

    assert_eq!(
        entries(&calls),
        vec![
            format!("create {view}"),
            format!("load {view} https://example.com/"),
            format!("reload {view}"),
            format!("destroy {view}"),
        ]
    );
}

#[test]
fn test_double_destroy_fires_listener_once() {
    let rt = headless(HeadlessBackend::new);
    let view = created_view(&rt);
    let fired = Arc::new(AtomicUsize::new(0));

    let count = Arc::clone(&fired);
    rt.on_destroy(view, move |_, _| {
        count.fetch_add(1, Ordering::SeqCst);
    });

    rt.destroy_view(view);
    rt.destroy_view(view);

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_destroyed_view_becomes_gone_on_engine() {
    let rt = headless(HeadlessBackend::new);
    let view = created_view(&rt);
    let object = rt.view(view).unwrap();

    rt.destroy_view(view);
    rt.call_sync(Role::Engine, || ());

    assert_eq!(object.state(), ViewState::Gone);
    assert!(rt.view(view).is_none());
}

#[test]
fn test_stale_handle_calls_are_silent() {
    let rt = headless(HeadlessBackend::new);
    let stale = Handle::from_raw(99);

    rt.reload(stale);
    rt.destroy_view(stale);
    rt.load_url(stale, "https://example.com/").unwrap();

    assert_eq!(rt.run_js(stale, "1"), None);
    assert_eq!(rt.url(stale), None);
    assert!(!rt.on_title_changed(stale, |_, _| {}));
}

// ============================================================================
// EVENTS
// ============================================================================

#[test]
fn test_load_events_arrive_in_order() {
    let rt = headless(|| {
        HeadlessBackend::new().with_document(&url("https://example.com/"), "<title>Example</title>")
    });
    let view = created_view(&rt);
    let events = log();

    let l = Arc::clone(&events);
    rt.on_navigation(view, move |_, kind, url| l.lock().unwrap().push(format!("navigation {kind:?} {url}")));
    let l = Arc::clone(&events);
    rt.on_load_begin(view, move |_, url| l.lock().unwrap().push(format!("load_begin {url}")));
    let l = Arc::clone(&events);
    rt.on_url_changed(view, move |_, url| l.lock().unwrap().push(format!("url {url}")));
    let l = Arc::clone(&events);
    rt.on_title_changed(view, move |_, title| l.lock().unwrap().push(format!("title {title}")));
    let l = Arc::clone(&events);
    rt.on_script_context_created(view, move |_, frame| l.lock().unwrap().push(format!("script_context {frame}")));
    let l = Arc::clone(&events);
    rt.on_document_ready(view, move |_| l.lock().unwrap().push("document_ready".to_string()));
    let l = Arc::clone(&events);
    rt.on_load_end(view, move |_, url, result| l.lock().unwrap().push(format!("load_end {url} {result:?}")));

    rt.load_url(view, "https://example.com/").unwrap();
    pump_until(&rt, || entries(&events).len() == 7);

    assert_eq!(
        entries(&events),
        vec![
            "navigation Other https://example.com/",
            "load_begin https://example.com/",
            "url https://example.com/",
            "title Example",
            "script_context 1",
            "document_ready",
            "load_end https://example.com/ Succeeded",
        ]
    );
}

#[test]
fn test_missing_document_reports_failure() {
    let rt = headless(HeadlessBackend::new);
    let view = created_view(&rt);
    let result = Arc::new(Mutex::new(None));

    let slot = Arc::clone(&result);
    rt.on_load_end(view, move |_, _, r| *slot.lock().unwrap() = Some(r.clone()));
    rt.load_url(view, "https://nowhere.example/").unwrap();

    pump_until(&rt, || result.lock().unwrap().is_some());
    assert!(matches!(
        result.lock().unwrap().as_ref(),
        Some(LoadResult::Failed { .. })
    ));
}

#[test]
fn test_events_for_destroyed_view_are_dropped() {
    let rt = headless(HeadlessBackend::new);
    let view = created_view(&rt);
    let events = log();

    let l = Arc::clone(&events);
    rt.on_title_changed(view, move |_, title| l.lock().unwrap().push(title.to_string()));
    rt.load_html(view, "<title>Too late</title>", None).unwrap();
    rt.destroy_view(view);

    rt.call_sync(Role::Engine, || ());
    rt.call_sync(Role::Engine, || ());
    for _ in 0..5 {
        rt.pump_ui();
        std::thread::sleep(Duration::from_millis(1));
    }

    assert!(entries(&events).is_empty());
}

#[test]
fn test_console_messages_reach_host() {
    let rt = headless(HeadlessBackend::new);
    let view = created_view(&rt);
    let messages = log();

    let l = Arc::clone(&messages);
    rt.on_console(view, move |_, msg| l.lock().unwrap().push(format!("{:?} {}", msg.level, msg.message)));
    assert_eq!(rt.run_js(view, "console.log('hi there')"), Some(JsValue::Undefined));

    pump_until(&rt, || !entries(&messages).is_empty());
    assert_eq!(entries(&messages), vec!["Log hi there"]);
}

// ============================================================================
// QUERIES
// ============================================================================

#[test]
fn test_run_js_and_page_queries() {
    let rt = headless(|| {
        HeadlessBackend::new().with_document(&url("https://example.com/"), "<title>Example</title>")
    });
    let view = rt.create_view();

    rt.load_url(view, "https://example.com/").unwrap();

    assert_eq!(rt.run_js(view, "42"), Some(JsValue::Number(42.0)));
    assert_eq!(rt.url(view).as_deref(), Some("https://example.com/"));
    assert_eq!(rt.title(view).as_deref(), Some("Example"));
    assert_eq!(
        rt.run_js(view, "document.title"),
        Some(JsValue::String("Example".into()))
    );
}

#[test]
fn test_user_agent_defaults_and_overrides() {
    let rt = headless(HeadlessBackend::new);
    let view = rt.create_view();

    let default_ua = rt.config().user_agent.clone();
    assert_eq!(
        rt.run_js(view, "navigator.userAgent"),
        Some(JsValue::String(default_ua))
    );

    rt.set_user_agent(view, "Custom/1.0");
    assert_eq!(
        rt.run_js(view, "navigator.userAgent"),
        Some(JsValue::String("Custom/1.0".into()))
    );
}

#[test]
fn test_history_queries() {
    let rt = headless(|| {
        HeadlessBackend::new()
            .with_document(&url("https://example.com/a"), "<title>A</title>")
            .with_document(&url("https://example.com/b"), "<title>B</title>")
    });
    let view = rt.create_view();
    rt.load_url(view, "https://example.com/a").unwrap();
    rt.load_url(view, "https://example.com/b").unwrap();

    let answers = Arc::new(Mutex::new(Vec::new()));
    let a = Arc::clone(&answers);
    rt.can_go_back(view, move |answer| a.lock().unwrap().push(answer));
    let a = Arc::clone(&answers);
    rt.can_go_forward(view, move |answer| a.lock().unwrap().push(answer));

    pump_until(&rt, || answers.lock().unwrap().len() == 2);
    assert_eq!(*answers.lock().unwrap(), vec![HistoryQuery::Yes, HistoryQuery::No]);

    rt.go_back(view);
    assert_eq!(rt.title(view).as_deref(), Some("A"));
}

#[test]
fn test_history_query_on_destroyed_view_is_stale() {
    let rt = headless(HeadlessBackend::new);
    let view = created_view(&rt);
    let answers = Arc::new(Mutex::new(Vec::new()));

    rt.destroy_view(view);
    let a = Arc::clone(&answers);
    rt.can_go_back(view, move |answer| a.lock().unwrap().push(answer));

    pump_until(&rt, || !answers.lock().unwrap().is_empty());
    rt.call_sync(Role::Engine, || ());
    rt.pump_ui();
    assert_eq!(*answers.lock().unwrap(), vec![HistoryQuery::StaleHandle]);
}

#[test]
fn test_js_query_round_trip() {
    let rt = headless(HeadlessBackend::new);
    let view = created_view(&rt);
    let received: Arc<Mutex<Option<JsQuery>>> = Arc::new(Mutex::new(None));

    let slot = Arc::clone(&received);
    rt.on_js_query(view, move |_, query| *slot.lock().unwrap() = Some(query.clone()));

    let id = rt.run_js(view, "fosQuery(3, 'ping')");
    assert_eq!(id, Some(JsValue::Number(1.0)));

    pump_until(&rt, || received.lock().unwrap().is_some());
    let query = received.lock().unwrap().clone().unwrap();
    assert_eq!(query.custom_msg, 3);
    assert_eq!(query.request, "ping");

    rt.response_js_query(view, query.query_id, query.custom_msg, "pong");
    assert_eq!(
        rt.run_js(view, "fosResponse(1)"),
        Some(JsValue::String("pong".into()))
    );
}

// ============================================================================
// CONTEXTS
// ============================================================================

#[test]
fn test_independent_runtimes_in_one_process() {
    let first = Runtime::init(
        Config {
            user_agent: "First/1.0".into(),
            engine_thread_name: "engine-a".into(),
            ..config()
        },
        || Ok(HeadlessBackend::new()),
    )
    .unwrap();
    let second = Runtime::init(
        Config {
            user_agent: "Second/1.0".into(),
            engine_thread_name: "engine-b".into(),
            ..config()
        },
        || Ok(HeadlessBackend::new()),
    )
    .unwrap();

    let a = first.create_view();
    let b = second.create_view();
    // Handles are per registry
    assert_eq!(a.raw(), b.raw());

    assert_eq!(
        first.run_js(a, "navigator.userAgent"),
        Some(JsValue::String("First/1.0".into()))
    );
    assert_eq!(
        second.run_js(b, "navigator.userAgent"),
        Some(JsValue::String("Second/1.0".into()))
    );

    first.shutdown();
    assert!(second.url(b).is_none());
    second.shutdown();
}
