//! Runtime Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// OS name of the engine thread
    pub engine_thread_name: String,

    /// Longest time a run loop parks before running its idle hook again
    pub idle_interval: Duration,

    /// User agent string applied to every new view
    pub user_agent: String,

    /// Queue depth at which a role logs a backlog warning
    pub queue_warn_threshold: usize,

    /// Enable JavaScript execution in new views
    pub enable_javascript: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine_thread_name: "fos-engine".to_string(),
            idle_interval: Duration::from_millis(10),
            user_agent: format!("fOS-Embed/{}", crate::VERSION),
            queue_warn_threshold: 1024,
            enable_javascript: true,
        }
    }
}
