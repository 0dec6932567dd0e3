//! Build state change events

use serde::{Deserialize, Serialize};

use super::build::Build;
use super::repo::Repo;

/// Kind of build state change announced on the event bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Enqueued,
    Started,
    Finished,
    Cancelled,
}

/// Payload pushed to build-event stream clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub repo: Repo,
    pub build: Build,
}
