//! Build domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::proc::Proc;
use super::status::Status;

/// One pipeline run for a repository
///
/// Timestamps are unix seconds, `0` meaning unset. `procs` is attached on
/// read and never persisted as part of the build record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Build {
    pub id: i64,
    pub repo_id: i64,
    pub number: i64,
    /// Number of the build this one was restarted from, `0` if none.
    pub parent: i64,
    pub event: EventKind,
    pub status: Status,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub enqueued: i64,
    pub created: i64,
    pub started: i64,
    pub finished: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deploy: String,
    pub commit: String,
    pub branch: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub message: String,
    pub author: String,
    pub sender: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reviewer: String,
    pub reviewed: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub procs: Vec<Proc>,
}

/// Forge event that triggered a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EventKind {
    #[default]
    #[serde(rename = "push")]
    Push,
    #[serde(rename = "pull_request")]
    Pull,
    #[serde(rename = "tag")]
    Tag,
    #[serde(rename = "deployment")]
    Deploy,
    #[serde(rename = "cron")]
    Cron,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::Pull => "pull_request",
            EventKind::Tag => "tag",
            EventKind::Deploy => "deployment",
            EventKind::Cron => "cron",
        }
    }

    /// The kinds a caller may pick when restarting a build.
    pub fn is_user_selectable(&self) -> bool {
        matches!(
            self,
            EventKind::Push | EventKind::Pull | EventKind::Tag | EventKind::Deploy
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(EventKind::Push),
            "pull_request" => Ok(EventKind::Pull),
            "tag" => Ok(EventKind::Tag),
            "deployment" => Ok(EventKind::Deploy),
            "cron" => Ok(EventKind::Cron),
            other => Err(format!("unknown event kind: {}", other)),
        }
    }
}
