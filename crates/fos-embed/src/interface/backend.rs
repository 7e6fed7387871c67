//! Engine Backend Interface
//!
//! The boundary to the wrapped single-threaded engine. A backend is built
//! on the engine thread and never leaves it, so it need not be `Send`.

use url::Url;

use crate::handle::Handle;
use crate::marshal::EventSink;

/// Navigation cause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    /// Link activation
    LinkClick,
    /// Form submission
    FormSubmit,
    /// History traversal
    BackForward,
    /// Reload of the current entry
    Reload,
    /// Re-posting a form
    FormResubmit,
    /// Host- or script-initiated
    Other,
}

/// Outcome reported with a load-end event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadResult {
    /// Document fully loaded
    Succeeded,
    /// Load failed
    Failed {
        /// Engine-supplied reason
        reason: String,
    },
    /// Load was stopped
    Canceled,
}

impl LoadResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Console message severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConsoleLevel {
    Debug,
    Log,
    Info,
    Warning,
    Error,
}

/// Console message raised by page script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMessage {
    pub level: ConsoleLevel,
    pub message: String,
    /// Script URL or name
    pub source: String,
    pub line: u32,
}

/// Query sent from page script to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsQuery {
    /// Id to quote in the reply
    pub query_id: i64,
    /// Application-defined message number
    pub custom_msg: i32,
    pub request: String,
}

/// JavaScript value (simplified)
#[derive(Debug, Clone, PartialEq)]
pub enum JsValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Object(String), // JSON representation
    Error(String),
}

impl JsValue {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// String payload, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Number payload, if this is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for JsValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) | Self::Object(s) => f.write_str(s),
            Self::Error(e) => write!(f, "Error: {e}"),
        }
    }
}

/// Per-view settings applied when the engine creates a view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewOptions {
    pub user_agent: String,
    pub enable_javascript: bool,
}

/// Engine adapter errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Engine could not be brought up
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    /// Engine refused to create a view
    #[error("Failed to create view: {0}")]
    CreateView(String),
}

/// Operations the wrapped engine provides
///
/// Every method runs on the engine thread. `view` handles passed in have
/// been created through `create_view` and not yet destroyed.
pub trait EngineBackend {
    /// Pump the engine's internal queues. Called once per loop iteration.
    fn pump(&mut self);

    /// Create engine-side state for `view`; events flow through `events`
    fn create_view(
        &mut self,
        view: Handle,
        options: &ViewOptions,
        events: EventSink,
    ) -> Result<(), BackendError>;

    /// Free engine-side state for `view`
    fn destroy_view(&mut self, view: Handle);

    /// Navigate to a URL
    fn load_url(&mut self, view: Handle, url: &Url);

    /// Load a document from memory
    fn load_html(&mut self, view: Handle, html: &str, base_url: Option<&Url>);

    /// Reload page
    fn reload(&mut self, view: Handle);

    /// Stop loading
    fn stop_loading(&mut self, view: Handle);

    /// Go back in history
    fn go_back(&mut self, view: Handle) -> bool;

    /// Go forward in history
    fn go_forward(&mut self, view: Handle) -> bool;

    fn can_go_back(&self, view: Handle) -> bool;

    fn can_go_forward(&self, view: Handle) -> bool;

    /// Evaluate script and return its completion value
    fn run_js(&mut self, view: Handle, script: &str) -> JsValue;

    /// Get current URL
    fn url(&self, view: Handle) -> Option<String>;

    /// Get page title
    fn title(&self, view: Handle) -> Option<String>;

    fn set_user_agent(&mut self, view: Handle, user_agent: &str);

    /// Deliver the host's reply to an earlier `JsQuery`
    fn respond_js_query(&mut self, view: Handle, query_id: i64, custom_msg: i32, response: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_value() {
        let val = JsValue::Error("test error".to_string());
        assert!(val.is_error());

        let val = JsValue::Number(42.0);
        assert!(!val.is_error());
        assert_eq!(val.as_f64(), Some(42.0));
        assert_eq!(val.to_string(), "42");
    }

    #[test]
    fn test_load_result() {
        assert!(LoadResult::Succeeded.is_success());
        assert!(!LoadResult::Canceled.is_success());
        assert!(!LoadResult::Failed { reason: "dns".into() }.is_success());
    }

    #[test]
    fn test_console_level_order() {
        assert!(ConsoleLevel::Error > ConsoleLevel::Warning);
        assert!(ConsoleLevel::Debug < ConsoleLevel::Log);
    }
}
