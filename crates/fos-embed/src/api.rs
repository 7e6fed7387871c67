//! API Table
//!
//! Every host-facing entry point, declared once with the thread it must be
//! called from. `Runtime` checks the table on entry.

use crate::thread::Role;

/// Thread an entry point may be called from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    /// UI thread only
    Ui,
    /// Any thread, attached or not
    Any,
}

impl Affinity {
    /// Check if a caller running as `role` may enter
    pub fn permits(self, role: Option<Role>) -> bool {
        match self {
            Self::Any => true,
            Self::Ui => role == Some(Role::Ui),
        }
    }
}

macro_rules! api_table {
    ($($id:ident => ($name:literal, $affinity:ident)),+ $(,)?) => {
        /// Host-facing entry points
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ApiId {
            $($id,)+
        }

        impl ApiId {
            pub const ALL: &'static [ApiId] = &[$(Self::$id,)+];

            /// Exported name
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$id => $name,)+
                }
            }

            pub const fn affinity(self) -> Affinity {
                match self {
                    $(Self::$id => Affinity::$affinity,)+
                }
            }
        }
    };
}

api_table! {
    CreateView => ("fos_create_view", Ui),
    DestroyView => ("fos_destroy_view", Ui),
    LoadUrl => ("fos_load_url", Ui),
    LoadHtml => ("fos_load_html", Ui),
    Reload => ("fos_reload", Ui),
    StopLoading => ("fos_stop_loading", Ui),
    GoBack => ("fos_go_back", Ui),
    GoForward => ("fos_go_forward", Ui),
    CanGoBack => ("fos_can_go_back", Ui),
    CanGoForward => ("fos_can_go_forward", Ui),
    RunJs => ("fos_run_js", Ui),
    Url => ("fos_get_url", Ui),
    Title => ("fos_get_title", Ui),
    SetUserAgent => ("fos_set_user_agent", Ui),
    ResponseJsQuery => ("fos_response_js_query", Ui),
    ViewState => ("fos_view_state", Any),
    GetView => ("fos_get_view", Any),
    OnTitleChanged => ("fos_on_title_changed", Ui),
    OnUrlChanged => ("fos_on_url_changed", Ui),
    OnNavigation => ("fos_on_navigation", Ui),
    OnLoadBegin => ("fos_on_load_begin", Ui),
    OnLoadEnd => ("fos_on_load_end", Ui),
    OnDocumentReady => ("fos_on_document_ready", Ui),
    OnScriptContextCreated => ("fos_on_script_context_created", Ui),
    OnJsQuery => ("fos_on_js_query", Ui),
    OnConsole => ("fos_on_console", Ui),
    OnDestroy => ("fos_on_destroy", Ui),
    PostTask => ("fos_post_task", Any),
    CallSync => ("fos_call_sync", Any),
    RegisterUiIdle => ("fos_register_ui_idle", Ui),
    RegisterUiPump => ("fos_register_ui_pump", Ui),
    PumpUi => ("fos_pump_ui", Ui),
    RunUi => ("fos_run_ui", Ui),
    QuitUi => ("fos_quit_ui", Any),
    Stats => ("fos_stats", Any),
    Shutdown => ("fos_shutdown", Ui),
}

impl std::fmt::Display for ApiId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
