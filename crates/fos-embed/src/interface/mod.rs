//! Engine Interface
//!
//! What the runtime needs from the wrapped engine, and a headless
//! implementation of it.

mod backend;
mod headless;

pub use backend::*;
pub use headless::HeadlessBackend;
