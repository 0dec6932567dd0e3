//! Agent acknowledgement DTOs

use serde::{Deserialize, Serialize};

/// Sent by an agent when it starts running a proc
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitProc {
    #[serde(default)]
    pub machine: String,
    #[serde(default)]
    pub platform: String,
}

/// Output lines produced by a running proc
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendLogs {
    pub lines: Vec<String>,
}

/// Sent by an agent when a proc exits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoneProc {
    pub exit_code: i32,
    #[serde(default)]
    pub error: Option<String>,
}
