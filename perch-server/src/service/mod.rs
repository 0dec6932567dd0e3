//! Service Module
//!
//! Business logic layer for the server.
//! Services sequence the store, queue, event bus and log streams around the
//! pure transitions in `perch_core::lifecycle`.

pub mod build;
pub mod cancel;
pub mod dispatch;
pub mod event;
pub mod proc;

#[cfg(test)]
pub(crate) mod testing;

// Re-export for convenience
pub use build as build_service;
pub use cancel as cancel_service;
pub use proc as proc_service;

/// Current unix time in seconds
pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
