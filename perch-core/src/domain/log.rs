//! Log domain types

use serde::{Deserialize, Serialize};

/// One line of proc output
///
/// `pos` is assigned by the live log stream, starting at 1 for every
/// stream session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub proc: String,
    pub pos: u64,
    pub out: String,
    pub time: i64,
}

impl LogLine {
    pub fn new(proc: impl Into<String>, out: impl Into<String>) -> Self {
        Self {
            proc: proc.into(),
            pos: 0,
            out: out.into(),
            time: chrono::Utc::now().timestamp(),
        }
    }
}
