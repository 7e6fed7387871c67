//! Handles
//!
//! Opaque, use-after-free-resistant identifiers for engine-owned objects.
//! Any thread may hold a handle; only a registry lookup yields the object.

mod registry;

pub use registry::*;
