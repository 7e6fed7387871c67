//! Embedding Runtime
//!
//! One explicit context per embedded engine: the view registry, the
//! two-role dispatcher and the engine thread. The thread that calls
//! [`Runtime::init`] becomes the UI thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use url::Url;

use crate::api::ApiId;
use crate::config::Config;
use crate::engine_side;
use crate::error::EmbedError;
use crate::handle::{Handle, HandleRegistry};
use crate::interface::{
    BackendError, ConsoleMessage, EngineBackend, JsQuery, JsValue, LoadResult, NavigationKind,
    ViewOptions,
};
use crate::marshal::{self, CallbackTable, EventSink};
use crate::thread::{Dispatcher, Role, RoleStats, StopOnExit, usage_violation};
use crate::view::{ViewState, WebView};

/// State shared by both role threads
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) views: HandleRegistry<WebView>,
    pub(crate) dispatcher: Dispatcher,
}

impl Shared {
    pub(crate) fn new(config: Config) -> Self {
        let dispatcher = Dispatcher::new(config.idle_interval, config.queue_warn_threshold);
        Self {
            config,
            views: HandleRegistry::new(),
            dispatcher,
        }
    }

    fn view_options(&self) -> ViewOptions {
        ViewOptions {
            user_agent: self.config.user_agent.clone(),
            enable_javascript: self.config.enable_javascript,
        }
    }
}

/// Answer to an asynchronous history query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryQuery {
    Yes,
    No,
    /// The view was destroyed before the answer arrived
    StaleHandle,
}

impl From<Option<bool>> for HistoryQuery {
    fn from(answer: Option<bool>) -> Self {
        match answer {
            Some(true) => Self::Yes,
            Some(false) => Self::No,
            None => Self::StaleHandle,
        }
    }
}

/// Embedded engine context
pub struct Runtime {
    shared: Arc<Shared>,
    engine_thread: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("views", &self.shared.views.len())
            .field("dispatcher", &self.shared.dispatcher)
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish()
    }
}

impl Runtime {
    /// Start the engine thread and bind the calling thread as UI
    ///
    /// `factory` runs on the engine thread. Returns once the engine loop is
    /// running, or with the error that kept it from starting.
    pub fn init<F, B>(config: Config, factory: F) -> Result<Self, EmbedError>
    where
        F: FnOnce() -> Result<B, BackendError> + Send + 'static,
        B: EngineBackend + 'static,
    {
        let shared = Arc::new(Shared::new(config));
        shared.dispatcher.attach(Role::Ui);

        let (ready_tx, ready_rx) = mpsc::channel();
        let engine_thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(shared.config.engine_thread_name.clone())
                .spawn(move || engine_main(&shared, factory, ready_tx))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = engine_thread.join();
                return Err(err.into());
            }
            Err(_) => {
                let _ = engine_thread.join();
                return Err(EmbedError::EngineStartup);
            }
        }

        tracing::info!(
            engine_thread = %shared.config.engine_thread_name,
            user_agent = %shared.config.user_agent,
            "runtime initialized"
        );

        Ok(Self {
            shared,
            engine_thread: Mutex::new(Some(engine_thread)),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Configuration this runtime was started with
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Entry check shared by every host-facing call
    fn enter(&self, api: ApiId) {
        let role = self.shared.dispatcher.current_role();
        if !api.affinity().permits(role) {
            usage_violation(format_args!(
                "{api} requires {:?} affinity, called from {}",
                api.affinity(),
                role.map_or("an unattached thread", |r| r.name())
            ));
        }

        let usable_after_shutdown = matches!(
            api,
            ApiId::Shutdown | ApiId::ViewState | ApiId::GetView | ApiId::Stats
        );
        if !usable_after_shutdown && self.shut_down.load(Ordering::Acquire) {
            usage_violation(format_args!("{api} called after shutdown"));
        }

        tracing::trace!(api = api.name(), "enter");
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    /// Create a view; engine-side initialisation completes asynchronously
    ///
    /// The handle is usable at once. Events start flowing once the view
    /// reaches [`ViewState::Created`].
    pub fn create_view(&self) -> Handle {
        self.enter(ApiId::CreateView);

        let handle = self.shared.views.register_with(WebView::new);
        let options = self.shared.view_options();
        let shared = Arc::clone(&self.shared);
        self.shared.dispatcher.post_async(Role::Engine, move || {
            let Some(guard) = shared.views.get_locked(handle) else {
                tracing::debug!(view = %handle, "view destroyed before engine init");
                return;
            };
            let events = EventSink::new(Arc::clone(&shared), handle);
            let result = engine_side::create_view(handle, &options, events);
            drop(guard);

            let ui = Arc::clone(&shared);
            shared
                .dispatcher
                .post_async(Role::Ui, move || finish_create(&ui, handle, result));
        });

        tracing::info!(view = %handle, "view created");
        handle
    }

    /// Destroy a view; a no-op for stale handles
    ///
    /// The handle stops resolving before this returns. The destroy listener
    /// fires once, here; engine-side state is freed asynchronously.
    pub fn destroy_view(&self, view: Handle) {
        self.enter(ApiId::DestroyView);

        let Some(object) = self.shared.views.get(view) else {
            return;
        };
        if matches!(object.state(), ViewState::Destroying | ViewState::Gone) {
            return;
        }

        object.set_state(ViewState::Destroying);
        self.shared.views.deconstruct(view);

        if let Some(listener) = object.listener(|t| t.destroy.clone()) {
            listener.on_destroy(view, &object);
        }
        object.update_listeners(|table| *table = CallbackTable::default());

        self.shared.dispatcher.post_async(Role::Engine, move || {
            if !engine_side::destroy_view(view) {
                tracing::debug!(%view, "view had no engine-side state");
            }
            object.set_state(ViewState::Gone);
        });

        tracing::info!(%view, "view destroyed");
    }

    /// Lifecycle state, or `None` once the view is unregistered
    pub fn view_state(&self, view: Handle) -> Option<ViewState> {
        self.enter(ApiId::ViewState);
        self.shared.views.get(view).map(|object| object.state())
    }

    /// Registered view object
    pub fn view(&self, view: Handle) -> Option<Arc<WebView>> {
        self.enter(ApiId::GetView);
        self.shared.views.get(view)
    }

    // ============================================================================
    // Engine operations
    // ============================================================================

    /// Run `op` against the backend on the engine thread if `view` is
    /// still alive when the task gets there
    fn post_to_view<F>(&self, view: Handle, op: F)
    where
        F: FnOnce(&mut dyn EngineBackend, Handle) + Send + 'static,
    {
        if !self.shared.views.contains(view) {
            tracing::debug!(%view, "stale handle, engine call skipped");
            return;
        }

        let shared = Arc::clone(&self.shared);
        self.shared.dispatcher.post_async(Role::Engine, move || {
            let Some(_guard) = shared.views.get_locked(view) else {
                tracing::debug!(%view, "view destroyed before engine task ran");
                return;
            };
            engine_side::with_view(view, |backend| op(backend, view));
        });
    }

    /// Navigate to `url`
    pub fn load_url(&self, view: Handle, url: &str) -> Result<(), EmbedError> {
        self.enter(ApiId::LoadUrl);
        let url = Url::parse(url)?;
        self.post_to_view(view, move |backend, view| backend.load_url(view, &url));
        Ok(())
    }

    /// Load `html` as a document, optionally under `base_url`
    pub fn load_html(&self, view: Handle, html: &str, base_url: Option<&str>) -> Result<(), EmbedError> {
        self.enter(ApiId::LoadHtml);
        let base_url = base_url.map(Url::parse).transpose()?;
        let html = html.to_owned();
        self.post_to_view(view, move |backend, view| {
            backend.load_html(view, &html, base_url.as_ref())
        });
        Ok(())
    }

    pub fn reload(&self, view: Handle) {
        self.enter(ApiId::Reload);
        self.post_to_view(view, |backend, view| backend.reload(view));
    }

    pub fn stop_loading(&self, view: Handle) {
        self.enter(ApiId::StopLoading);
        self.post_to_view(view, |backend, view| backend.stop_loading(view));
    }

    pub fn go_back(&self, view: Handle) {
        self.enter(ApiId::GoBack);
        self.post_to_view(view, |backend, view| {
            if !backend.go_back(view) {
                tracing::debug!(%view, "no history entry to go back to");
            }
        });
    }

    pub fn go_forward(&self, view: Handle) {
        self.enter(ApiId::GoForward);
        self.post_to_view(view, |backend, view| {
            if !backend.go_forward(view) {
                tracing::debug!(%view, "no history entry to go forward to");
            }
        });
    }

    /// Ask whether `view` can go back; `callback` runs once on the UI thread
    pub fn can_go_back<C>(&self, view: Handle, callback: C)
    where
        C: FnOnce(HistoryQuery) + Send + 'static,
    {
        self.enter(ApiId::CanGoBack);
        marshal::request(
            &self.shared,
            view,
            |backend, view| backend.can_go_back(view),
            move |answer| callback(answer.into()),
        );
    }

    /// Ask whether `view` can go forward; `callback` runs once on the UI thread
    pub fn can_go_forward<C>(&self, view: Handle, callback: C)
    where
        C: FnOnce(HistoryQuery) + Send + 'static,
    {
        self.enter(ApiId::CanGoForward);
        marshal::request(
            &self.shared,
            view,
            |backend, view| backend.can_go_forward(view),
            move |answer| callback(answer.into()),
        );
    }

    /// Evaluate `script` and wait for its completion value
    ///
    /// Blocks the UI thread until the engine answers. `None` if the view
    /// is gone.
    pub fn run_js(&self, view: Handle, script: &str) -> Option<JsValue> {
        self.enter(ApiId::RunJs);
        let script = script.to_owned();
        marshal::query(&self.shared, view, move |backend, view| backend.run_js(view, &script))
    }

    /// Current URL of the view
    pub fn url(&self, view: Handle) -> Option<String> {
        self.enter(ApiId::Url);
        marshal::query(&self.shared, view, |backend, view| backend.url(view)).flatten()
    }

    /// Current title of the view
    pub fn title(&self, view: Handle) -> Option<String> {
        self.enter(ApiId::Title);
        marshal::query(&self.shared, view, |backend, view| backend.title(view)).flatten()
    }

    pub fn set_user_agent(&self, view: Handle, user_agent: &str) {
        self.enter(ApiId::SetUserAgent);
        let user_agent = user_agent.to_owned();
        self.post_to_view(view, move |backend, view| backend.set_user_agent(view, &user_agent));
    }

    /// Answer a js query received through [`Runtime::on_js_query`]
    pub fn response_js_query(&self, view: Handle, query_id: i64, custom_msg: i32, response: &str) {
        self.enter(ApiId::ResponseJsQuery);
        let response = response.to_owned();
        self.post_to_view(view, move |backend, view| {
            backend.respond_js_query(view, query_id, custom_msg, &response)
        });
    }

    // ============================================================================
    // Listeners
    // ============================================================================

    /// Replace one listener slot. Returns false for a stale handle.
    fn listen(&self, api: ApiId, view: Handle, update: impl FnOnce(&mut CallbackTable)) -> bool {
        self.enter(api);
        match self.shared.views.get(view) {
            Some(object) => {
                object.update_listeners(update);
                true
            }
            None => false,
        }
    }

    pub fn on_title_changed<F>(&self, view: Handle, listener: F) -> bool
    where
        F: Fn(Handle, &str) + Send + Sync + 'static,
    {
        self.listen(ApiId::OnTitleChanged, view, |t| t.title_changed = Some(Arc::new(listener)))
    }

    pub fn on_url_changed<F>(&self, view: Handle, listener: F) -> bool
    where
        F: Fn(Handle, &str) + Send + Sync + 'static,
    {
        self.listen(ApiId::OnUrlChanged, view, |t| t.url_changed = Some(Arc::new(listener)))
    }

    /// Navigation notifications. Navigations cannot be vetoed from here.
    pub fn on_navigation<F>(&self, view: Handle, listener: F) -> bool
    where
        F: Fn(Handle, NavigationKind, &str) + Send + Sync + 'static,
    {
        self.listen(ApiId::OnNavigation, view, |t| t.navigation = Some(Arc::new(listener)))
    }

    pub fn on_load_begin<F>(&self, view: Handle, listener: F) -> bool
    where
        F: Fn(Handle, &str) + Send + Sync + 'static,
    {
        self.listen(ApiId::OnLoadBegin, view, |t| t.load_begin = Some(Arc::new(listener)))
    }

    pub fn on_load_end<F>(&self, view: Handle, listener: F) -> bool
    where
        F: Fn(Handle, &str, &LoadResult) + Send + Sync + 'static,
    {
        self.listen(ApiId::OnLoadEnd, view, |t| t.load_end = Some(Arc::new(listener)))
    }

    pub fn on_document_ready<F>(&self, view: Handle, listener: F) -> bool
    where
        F: Fn(Handle) + Send + Sync + 'static,
    {
        self.listen(ApiId::OnDocumentReady, view, |t| t.document_ready = Some(Arc::new(listener)))
    }

    pub fn on_script_context_created<F>(&self, view: Handle, listener: F) -> bool
    where
        F: Fn(Handle, i64) + Send + Sync + 'static,
    {
        self.listen(ApiId::OnScriptContextCreated, view, |t| {
            t.script_context_created = Some(Arc::new(listener))
        })
    }

    pub fn on_js_query<F>(&self, view: Handle, listener: F) -> bool
    where
        F: Fn(Handle, &JsQuery) + Send + Sync + 'static,
    {
        self.listen(ApiId::OnJsQuery, view, |t| t.js_query = Some(Arc::new(listener)))
    }

    pub fn on_console<F>(&self, view: Handle, listener: F) -> bool
    where
        F: Fn(Handle, &ConsoleMessage) + Send + Sync + 'static,
    {
        self.listen(ApiId::OnConsole, view, |t| t.console = Some(Arc::new(listener)))
    }

    /// Fires once, from `destroy_view`, after the handle stopped resolving
    ///
    /// The listener still sees the view object itself.
    pub fn on_destroy<F>(&self, view: Handle, listener: F) -> bool
    where
        F: Fn(Handle, &WebView) + Send + Sync + 'static,
    {
        self.listen(ApiId::OnDestroy, view, |t| t.destroy = Some(Arc::new(listener)))
    }

    // ============================================================================
    // Dispatcher access
    // ============================================================================

    /// Queue `f` on `role`
    pub fn post_task<F>(&self, role: Role, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enter(ApiId::PostTask);
        self.shared.dispatcher.post_async(role, f);
    }

    /// Run `f` on `role` and wait for its result
    pub fn call_sync<F, R>(&self, role: Role, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.enter(ApiId::CallSync);
        self.shared.dispatcher.call_sync(role, f)
    }

    /// Install the UI idle hook, run at the start of every UI iteration
    pub fn register_ui_idle<F>(&self, hook: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.enter(ApiId::RegisterUiIdle);
        self.shared.dispatcher.register_idle(Role::Ui, Box::new(hook));
    }

    /// Install the host's native message pump, run at the end of every UI iteration
    pub fn register_ui_pump<F>(&self, hook: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.enter(ApiId::RegisterUiPump);
        self.shared.dispatcher.register_pump(Role::Ui, Box::new(hook));
    }

    /// Run one UI loop iteration; returns the number of tasks executed
    pub fn pump_ui(&self) -> usize {
        self.enter(ApiId::PumpUi);
        self.shared.dispatcher.run_once(Role::Ui)
    }

    /// Run the UI loop until [`Runtime::quit_ui`]
    pub fn run_ui(&self) {
        self.enter(ApiId::RunUi);
        self.shared.dispatcher.run(Role::Ui);
    }

    pub fn quit_ui(&self) {
        self.enter(ApiId::QuitUi);
        self.shared.dispatcher.quit(Role::Ui);
    }

    pub fn stats(&self, role: Role) -> RoleStats {
        self.enter(ApiId::Stats);
        self.shared.dispatcher.stats(role)
    }

    /// Stop the engine loop and join its thread
    ///
    /// Tasks still queued for the engine are dropped without running.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.enter(ApiId::Shutdown);
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_engine();
    }

    fn stop_engine(&self) {
        self.shared.dispatcher.quit(Role::Engine);
        let engine_thread = self
            .engine_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(engine_thread) = engine_thread {
            if engine_thread.join().is_err() {
                tracing::error!("engine thread terminated by panic");
            }
        }
        tracing::info!(views = self.shared.views.len(), "runtime shut down");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            self.stop_engine();
        }
        // Queued UI tasks hold references back into the shared state
        self.shared.dispatcher.stop(Role::Ui);
    }
}

/// UI-side completion of `create_view`
fn finish_create(shared: &Shared, handle: Handle, result: Result<(), BackendError>) {
    let Some(view) = shared.views.get(handle) else {
        return;
    };

    match result {
        Ok(()) => {
            if view.advance(ViewState::Creating, ViewState::Created) {
                tracing::debug!(view = %handle, age = ?view.age(), "view ready");
            }
        }
        Err(err) => {
            tracing::error!(view = %handle, %err, "engine failed to create view");
            view.set_state(ViewState::Gone);
            shared.views.deconstruct(handle);
        }
    }
}

/// Body of the engine thread
fn engine_main<F, B>(shared: &Shared, factory: F, ready: mpsc::Sender<Result<(), BackendError>>)
where
    F: FnOnce() -> Result<B, BackendError>,
    B: EngineBackend + 'static,
{
    shared.dispatcher.attach(Role::Engine);
    let _stop = StopOnExit::new(&shared.dispatcher, Role::Engine);

    let backend = match factory() {
        Ok(backend) => backend,
        Err(err) => {
            tracing::error!(%err, "engine backend failed to start");
            let _ = ready.send(Err(err));
            return;
        }
    };
    engine_side::install(Box::new(backend));
    shared
        .dispatcher
        .register_idle(Role::Engine, Box::new(engine_side::pump));

    tracing::info!("engine thread running");
    let _ = ready.send(Ok(()));

    shared.dispatcher.run(Role::Engine);
    engine_side::uninstall();
}
