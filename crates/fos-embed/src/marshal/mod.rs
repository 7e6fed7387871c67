//! Callback Marshaling
//!
//! Carries engine events to host listeners on the UI thread.
//! - `callbacks`: per-view listener slots
//! - `trampoline`: copy, hop, re-validate, invoke

mod callbacks;
mod trampoline;

pub use callbacks::*;
pub use trampoline::EventSink;
pub(crate) use trampoline::{query, request};
