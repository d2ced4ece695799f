use std::path::PathBuf;
use std::time::Duration;

use crate::limits::DEFAULT_LOCK_TIMEOUT;

/// Server configuration, read from `ROOMLOCK_*` environment variables.
/// Unparseable numbers fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub lock_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            port: lookup("ROOMLOCK_PORT")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(5433),
            bind: lookup("ROOMLOCK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: lookup("ROOMLOCK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            password: lookup("ROOMLOCK_PASSWORD").unwrap_or_else(|| "roomlock".into()),
            max_connections: parsed("ROOMLOCK_MAX_CONNECTIONS")
                .filter(|n| *n > 0)
                .map(|n| n as usize)
                .unwrap_or(256),
            compact_threshold: parsed("ROOMLOCK_COMPACT_THRESHOLD").unwrap_or(1000),
            lock_timeout: parsed("ROOMLOCK_LOCK_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_LOCK_TIMEOUT),
            metrics_port: lookup("ROOMLOCK_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            tls_cert: lookup("ROOMLOCK_TLS_CERT"),
            tls_key: lookup("ROOMLOCK_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
