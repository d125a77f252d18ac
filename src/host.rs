use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::observability::HOSTS_ACTIVE;

/// Manages per-host engines. Each host gets its own Engine, WAL and compactor.
/// Host = database name from the pgwire connection.
pub struct HostManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    max_hosts: usize,
}

/// Keep only characters that are safe in a file name.
fn sanitize(host: &str) -> String {
    host.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

impl HostManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            max_hosts: MAX_HOSTS,
        }
    }

    /// Lower the host cap below `MAX_HOSTS`.
    pub fn with_max_hosts(mut self, max_hosts: usize) -> Self {
        self.max_hosts = max_hosts.min(MAX_HOSTS);
        self
    }

    /// Get or lazily create the engine for `host`, replaying its WAL.
    ///
    /// Engines are keyed by the sanitized name, the same name the WAL file
    /// carries, so names that sanitize alike share one engine.
    pub fn get_or_create(&self, host: &str) -> io::Result<Arc<Engine>> {
        if host.len() > MAX_HOST_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "host name too long"));
        }
        let safe_name = sanitize(host);
        if safe_name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty host name"));
        }
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        // Checked before taking the entry lock; len() visits every shard.
        if self.engines.len() >= self.max_hosts {
            return Err(io::Error::other("too many hosts"));
        }

        let engine = match self.engines.entry(safe_name.clone()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let engine = Arc::new(Engine::new(safe_name.as_str(), wal_path)?);
                slot.insert(engine.clone());
                engine
            }
        };

        tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));
        metrics::gauge!(HOSTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!(host, wal = %safe_name, "host engine loaded");
        Ok(engine)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
