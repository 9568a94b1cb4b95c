use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;

use crate::timefmt::{parse_utc_offset, utc};

/// Process configuration, read once from `SPOTLIGHT_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub reap_interval: Duration,
    pub store_timeout: Duration,
    /// Offset for start times that arrive without one (browser local time).
    pub utc_offset: FixedOffset,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparsable numbers fall back to
    /// their defaults; a bad UTC offset is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let utc_offset = match lookup("SPOTLIGHT_UTC_OFFSET") {
            Some(raw) => parse_utc_offset(&raw)?,
            None => utc(),
        };

        Ok(Self {
            bind: lookup("SPOTLIGHT_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "SPOTLIGHT_PORT").unwrap_or(5433),
            data_dir: PathBuf::from(
                lookup("SPOTLIGHT_DATA_DIR").unwrap_or_else(|| "./data".into()),
            ),
            password: lookup("SPOTLIGHT_PASSWORD").unwrap_or_else(|| "spotlight".into()),
            max_connections: parsed(&lookup, "SPOTLIGHT_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&lookup, "SPOTLIGHT_COMPACT_THRESHOLD").unwrap_or(1000),
            reap_interval: Duration::from_secs(
                parsed(&lookup, "SPOTLIGHT_REAP_INTERVAL_SECS").unwrap_or(30),
            ),
            store_timeout: Duration::from_millis(
                parsed(&lookup, "SPOTLIGHT_STORE_TIMEOUT_MS").unwrap_or(5000),
            ),
            utc_offset,
            metrics_port: parsed(&lookup, "SPOTLIGHT_METRICS_PORT"),
            tls_cert: lookup("SPOTLIGHT_TLS_CERT"),
            tls_key: lookup("SPOTLIGHT_TLS_KEY"),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slots.wal")
    }
}
