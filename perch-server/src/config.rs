//! Server configuration
//!
//! Read once from the environment at start-up. Malformed numbers fall back
//! to their defaults.

use std::collections::HashMap;
use std::time::Duration;

use crate::pubsub::DEFAULT_BACKLOG;
use crate::stream::StreamPolicy;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Postgres URL; the in-memory store is used when unset.
    pub database_url: Option<String>,
    /// JSON fixture loaded into the in-memory store.
    pub seed_file: Option<String>,
    pub bind_addr: String,
    /// Public base URL used in forge status links.
    pub host: String,
    /// Variables injected into every build.
    pub environment: HashMap<String, String>,
    /// Shared secret agents present on the proc endpoints, if any.
    pub agent_secret: Option<String>,
    pub stream_heartbeat: Duration,
    pub stream_max_age: Duration,
    pub subscriber_backlog: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let policy = StreamPolicy::default();
        Self {
            database_url: None,
            seed_file: None,
            bind_addr: "0.0.0.0:8000".to_string(),
            host: "http://localhost:8000".to_string(),
            environment: HashMap::new(),
            agent_secret: None,
            stream_heartbeat: policy.heartbeat,
            stream_max_age: policy.max_age,
            subscriber_backlog: DEFAULT_BACKLOG,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str, default: Duration| {
            var(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|s| *s > 0)
                .map_or(default, Duration::from_secs)
        };

        Self {
            database_url: var("DATABASE_URL"),
            seed_file: var("PERCH_SEED_FILE"),
            bind_addr: var("PERCH_BIND_ADDR").unwrap_or(defaults.bind_addr),
            host: var("PERCH_HOST").unwrap_or(defaults.host),
            environment: var("PERCH_ENVIRONMENT")
                .map(|v| parse_environment(&v))
                .unwrap_or_default(),
            agent_secret: var("PERCH_AGENT_SECRET"),
            stream_heartbeat: secs("PERCH_STREAM_HEARTBEAT", defaults.stream_heartbeat),
            stream_max_age: secs("PERCH_STREAM_MAX_AGE", defaults.stream_max_age),
            subscriber_backlog: var("PERCH_SUBSCRIBER_BACKLOG")
                .and_then(|v| v.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.subscriber_backlog),
        }
    }

    pub fn stream_policy(&self) -> StreamPolicy {
        StreamPolicy {
            heartbeat: self.stream_heartbeat,
            max_age: self.stream_max_age,
        }
    }
}

/// Parse `KEY:VALUE,KEY:VALUE`. Entries without a `:` are ignored.
pub fn parse_environment(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(|_| None);
        assert!(config.database_url.is_none());
        assert_eq!(config.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.stream_heartbeat, Duration::from_secs(30));
        assert_eq!(config.stream_max_age, Duration::from_secs(3600));
        assert_eq!(config.subscriber_backlog, 256);
    }

    #[test]
    fn test_overrides_and_bad_numbers() {
        let env = HashMap::from([
            ("DATABASE_URL", "postgres://localhost/perch"),
            ("PERCH_STREAM_HEARTBEAT", "5"),
            ("PERCH_STREAM_MAX_AGE", "soon"),
            ("PERCH_SUBSCRIBER_BACKLOG", "0"),
            ("PERCH_ENVIRONMENT", "GOPROXY:direct, TZ:UTC"),
        ]);
        let config = ServerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/perch"));
        assert_eq!(config.stream_heartbeat, Duration::from_secs(5));
        assert_eq!(config.stream_max_age, Duration::from_secs(3600));
        assert_eq!(config.subscriber_backlog, 256);
        assert_eq!(config.environment["TZ"], "UTC");
        assert_eq!(config.environment["GOPROXY"], "direct");
    }

    #[test]
    fn test_parse_environment_skips_malformed_pairs() {
        let env = parse_environment("A:1,broken,:2,B:x:y");
        assert_eq!(env.len(), 2);
        assert_eq!(env["A"], "1");
        assert_eq!(env["B"], "x:y");
    }
}
