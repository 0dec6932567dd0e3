//! Core domain types
//!
//! The structures the server persists, streams and reasons about. Builds and
//! procs are stored flat; `proc::tree` rebuilds the hierarchy on demand.

pub mod build;
pub mod event;
pub mod log;
pub mod proc;
pub mod repo;
pub mod status;

pub use build::{Build, EventKind};
pub use event::{BuildEvent, EventType};
pub use log::LogLine;
pub use proc::Proc;
pub use repo::{Config, Registry, Repo, Secret, User};
pub use status::Status;
