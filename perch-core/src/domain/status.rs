//! Build and proc status

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status shared by builds and procs
///
/// Procs only ever use a subset (`blocked` and `declined` are build-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Running,
    Success,
    Failure,
    Killed,
    Error,
    Blocked,
    Declined,
    Skipped,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Success => "success",
            Status::Failure => "failure",
            Status::Killed => "killed",
            Status::Error => "error",
            Status::Blocked => "blocked",
            Status::Declined => "declined",
            Status::Skipped => "skipped",
        }
    }

    /// Pending or running: work may still happen.
    pub fn is_active(&self) -> bool {
        matches!(self, Status::Pending | Status::Running)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "running" => Ok(Status::Running),
            "success" => Ok(Status::Success),
            "failure" => Ok(Status::Failure),
            "killed" => Ok(Status::Killed),
            "error" => Ok(Status::Error),
            "blocked" => Ok(Status::Blocked),
            "declined" => Ok(Status::Declined),
            "skipped" => Ok(Status::Skipped),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_form_matches_serde() {
        for status in [Status::Pending, Status::Blocked, Status::Skipped] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!("queued".parse::<Status>().is_err());
    }
}
