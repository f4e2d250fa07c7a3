//! Kernel synchronization helpers.

pub mod once_lock;

pub use once_lock::{GlobalState, OnceLock};
