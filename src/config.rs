use std::path::PathBuf;
use std::str::FromStr;

use crate::limits::{MAX_CONNECTIONS, MAX_HOSTS};

/// Server settings, read from `CALSLOT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// Loaded host engines; capped at `MAX_HOSTS`.
    pub max_hosts: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "calslot".into(),
            max_connections: MAX_CONNECTIONS,
            max_hosts: MAX_HOSTS,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparsable numbers fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: lookup("CALSLOT_BIND").unwrap_or(defaults.bind),
            port: parse_var(&lookup, "CALSLOT_PORT").unwrap_or(defaults.port),
            data_dir: lookup("CALSLOT_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            password: lookup("CALSLOT_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_var(&lookup, "CALSLOT_MAX_CONNECTIONS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_connections),
            max_hosts: parse_var(&lookup, "CALSLOT_MAX_HOSTS")
                .filter(|n: &usize| *n > 0)
                .map_or(defaults.max_hosts, |n| n.min(MAX_HOSTS)),
            compact_threshold: parse_var(&lookup, "CALSLOT_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            metrics_port: parse_var(&lookup, "CALSLOT_METRICS_PORT"),
            tls_cert: lookup("CALSLOT_TLS_CERT"),
            tls_key: lookup("CALSLOT_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
