//! Build request DTOs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Query keys with a meaning of their own on restart.
pub const RESERVED_RESTART_PARAMS: [&str; 3] = ["fork", "event", "deploy_to"];

/// Options accepted when restarting a build
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestartOptions {
    /// Event kind override, ignored unless it names a selectable kind.
    pub event: Option<String>,
    /// Deploy target override.
    pub deploy_to: Option<String>,
    /// Extra parameters forwarded to the pipeline builder as environment.
    pub params: HashMap<String, String>,
}

impl RestartOptions {
    /// Split raw query parameters into overrides and build parameters.
    pub fn from_query(query: HashMap<String, String>) -> Self {
        let mut opts = RestartOptions::default();
        for (key, value) in query {
            if !RESERVED_RESTART_PARAMS.contains(&key.as_str()) {
                opts.params.insert(key, value);
                continue;
            }
            match key.as_str() {
                "event" => opts.event = Some(value),
                "deploy_to" => opts.deploy_to = Some(value),
                _ => {}
            }
        }
        opts
    }
}

/// Pagination for build listings
#[derive(Debug, Clone, Deserialize)]
pub struct ListBuilds {
    #[serde(default = "first_page")]
    pub page: i64,
}

fn first_page() -> i64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_query_excludes_reserved_names() {
        let query = HashMap::from([
            ("event".to_string(), "tag".to_string()),
            ("deploy_to".to_string(), "production".to_string()),
            ("fork".to_string(), "true".to_string()),
            ("VERSION".to_string(), "1.2.3".to_string()),
        ]);

        let opts = RestartOptions::from_query(query);

        assert_eq!(opts.event.as_deref(), Some("tag"));
        assert_eq!(opts.deploy_to.as_deref(), Some("production"));
        assert_eq!(opts.params.len(), 1);
        assert_eq!(opts.params["VERSION"], "1.2.3");
        for reserved in RESERVED_RESTART_PARAMS {
            assert!(!opts.params.contains_key(reserved));
        }
    }
}
