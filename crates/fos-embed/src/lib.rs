//! fOS Embed
//!
//! Embeds a single-threaded browser engine in a host application.
//!
//! # Threads
//! - UI: the host thread that calls [`Runtime::init`]
//! - Engine: spawned by the runtime; owns the [`EngineBackend`]
//!
//! Views are addressed by [`Handle`]s that any thread may hold. Engine
//! events are copied, moved to the UI thread and checked against the
//! registry before a host listener sees them.
//!
//! # Example
//! ```rust,no_run
//! use fos_embed::{Config, HeadlessBackend, Runtime};
//!
//! let runtime = Runtime::init(Config::default(), || Ok(HeadlessBackend::new()))?;
//! let view = runtime.create_view();
//! runtime.on_title_changed(view, |view, title| println!("{view}: {title}"));
//! runtime.load_html(view, "<title>Hello</title>", None)?;
//! runtime.pump_ui();
//! runtime.shutdown();
//! # Ok::<(), fos_embed::EmbedError>(())
//! ```

pub mod api;
pub mod handle;
pub mod interface;
pub mod marshal;
pub mod thread;
mod config;
mod engine_side;
mod error;
mod runtime;
mod view;

pub use config::Config;
pub use error::EmbedError;
pub use handle::{Handle, HandleGuard, HandleRegistry};
pub use interface::{
    BackendError, ConsoleLevel, ConsoleMessage, EngineBackend, HeadlessBackend, JsQuery, JsValue,
    LoadResult, NavigationKind, ViewOptions,
};
pub use marshal::{EventKind, EventSink};
pub use runtime::{HistoryQuery, Runtime};
pub use thread::{Role, RoleState, RoleStats};
pub use view::{ViewState, WebView};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
