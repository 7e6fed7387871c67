//! Threading Model
//!
//! Two cooperating single-threaded run loops and the tasks moved between them.
//! - UI: the host thread that initialised the runtime
//! - Engine: the thread that owns the wrapped engine

mod role;
mod task;
mod dispatcher;

pub use role::*;
pub use task::*;
pub use dispatcher::*;
