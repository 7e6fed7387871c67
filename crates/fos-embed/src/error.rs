//! Runtime errors
//!
//! Stale handles are not errors: lookups report them as `None`.

use crate::interface::BackendError;

/// Errors surfaced to the host
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Engine thread could not be spawned
    #[error("Failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Backend failed during start-up
    #[error("Engine backend error: {0}")]
    Backend(#[from] BackendError),

    /// Engine thread exited before reporting ready
    #[error("Engine thread exited during startup")]
    EngineStartup,

    /// URL passed to a navigation call did not parse
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
