//! Peer directory: where nodes register themselves and look each other up.
//!
//! The transfer engine only needs `lookup` and `list_peers`; the daemon also
//! registers on startup and deregisters on shutdown. Two backends:
//!
//! - [`MemoryDirectory`]: in-process, for tests and statically configured peers.
//! - [`FileDirectory`]: a JSON file shared by every node on one host.

use std::collections::BTreeMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use grrrr_core::config::StaticPeer;

/// How to reach one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub name: String,
    pub host: String,
    pub stream_port: u16,
    pub datagram_port: u16,
}

impl PeerRecord {
    pub fn stream_addr(&self) -> Result<SocketAddr, DirectoryError> {
        resolve(&self.host, self.stream_port)
    }

    pub fn datagram_addr(&self) -> Result<SocketAddr, DirectoryError> {
        resolve(&self.host, self.datagram_port)
    }
}

impl From<&StaticPeer> for PeerRecord {
    fn from(p: &StaticPeer) -> Self {
        Self {
            name: p.name.clone(),
            host: p.host.clone(),
            stream_port: p.stream_port,
            datagram_port: p.datagram_port,
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, DirectoryError> {
    (host, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| DirectoryError::BadAddress(format!("{host}:{port}")))
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory I/O on {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("directory file {0} is corrupt: {1}")]
    Corrupt(PathBuf, serde_json::Error),
    #[error("cannot resolve peer address {0}")]
    BadAddress(String),
}

pub trait Directory: Send + Sync {
    /// Add or replace the record for `record.name`.
    fn register(&self, record: PeerRecord) -> Result<(), DirectoryError>;
    fn deregister(&self, name: &str) -> Result<(), DirectoryError>;
    /// Names of all registered nodes, sorted.
    fn list_peers(&self) -> Result<Vec<String>, DirectoryError>;
    fn lookup(&self, name: &str) -> Result<Option<PeerRecord>, DirectoryError>;
}

// ── Memory backend ────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MemoryDirectory {
    records: Arc<DashMap<String, PeerRecord>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate from `[directory].peers`.
    pub fn with_peers(peers: &[StaticPeer]) -> Self {
        let dir = Self::new();
        for p in peers {
            dir.records.insert(p.name.clone(), PeerRecord::from(p));
        }
        dir
    }
}

impl Directory for MemoryDirectory {
    fn register(&self, record: PeerRecord) -> Result<(), DirectoryError> {
        self.records.insert(record.name.clone(), record);
        Ok(())
    }

    fn deregister(&self, name: &str) -> Result<(), DirectoryError> {
        self.records.remove(name);
        Ok(())
    }

    fn list_peers(&self) -> Result<Vec<String>, DirectoryError> {
        let mut names: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    fn lookup(&self, name: &str) -> Result<Option<PeerRecord>, DirectoryError> {
        Ok(self.records.get(name).map(|r| r.clone()))
    }
}

// ── File backend ──────────────────────────────────────────────────────────────

/// JSON-file directory. Every call re-reads the file so registrations by
/// other processes are visible; writes go to a temp file and are renamed
/// into place.
pub struct FileDirectory {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, PeerRecord>, DirectoryError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(DirectoryError::Io(self.path.clone(), e)),
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|e| DirectoryError::Corrupt(self.path.clone(), e))
    }

    fn store(&self, records: &BTreeMap<String, PeerRecord>) -> Result<(), DirectoryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DirectoryError::Io(self.path.clone(), e))?;
        }
        let json = serde_json::to_string_pretty(records)
            .map_err(|e| DirectoryError::Corrupt(self.path.clone(), e))?;
        let tmp = self
            .path
            .with_extension(format!("json.tmp.{}", std::process::id()));
        std::fs::write(&tmp, json).map_err(|e| DirectoryError::Io(tmp.clone(), e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| DirectoryError::Io(self.path.clone(), e))
    }

    fn modify(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, PeerRecord>),
    ) -> Result<(), DirectoryError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = self.load()?;
        f(&mut records);
        self.store(&records)
    }
}

impl Directory for FileDirectory {
    fn register(&self, record: PeerRecord) -> Result<(), DirectoryError> {
        tracing::debug!(name = %record.name, path = %self.path.display(), "registering in directory");
        self.modify(|records| {
            records.insert(record.name.clone(), record);
        })
    }

    fn deregister(&self, name: &str) -> Result<(), DirectoryError> {
        self.modify(|records| {
            records.remove(name);
        })
    }

    fn list_peers(&self) -> Result<Vec<String>, DirectoryError> {
        Ok(self.load()?.into_keys().collect())
    }

    fn lookup(&self, name: &str) -> Result<Option<PeerRecord>, DirectoryError> {
        Ok(self.load()?.remove(name))
    }
}

// ── Peer cache ────────────────────────────────────────────────────────────────

/// Local copy of peer details, refreshed from the directory on `list` and
/// when a message arrives from an unknown sender.
#[derive(Clone, Default)]
pub struct PeerCache {
    peers: Arc<DashMap<String, PeerRecord>>,
}

impl PeerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache with every record in the directory except `own_name`.
    /// Returns the names now cached, sorted.
    pub fn refresh(
        &self,
        directory: &dyn Directory,
        own_name: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        let mut fresh = Vec::new();
        for name in directory.list_peers()? {
            if name == own_name {
                continue;
            }
            if let Some(record) = directory.lookup(&name)? {
                fresh.push(record);
            }
        }

        self.peers.retain(|name, _| fresh.iter().any(|r| &r.name == name));
        let mut names = Vec::with_capacity(fresh.len());
        for record in fresh {
            names.push(record.name.clone());
            self.peers.insert(record.name.clone(), record);
        }
        names.sort();
        tracing::debug!(count = names.len(), "peer cache refreshed");
        Ok(names)
    }

    pub fn get(&self, name: &str) -> Option<PeerRecord> {
        self.peers.get(name).map(|r| r.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.peers.contains_key(name)
    }

    pub fn insert(&self, record: PeerRecord) {
        self.peers.insert(record.name.clone(), record);
    }

    pub fn remove(&self, name: &str) -> Option<PeerRecord> {
        self.peers.remove(name).map(|(_, r)| r)
    }

    pub fn all(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self.peers.iter().map(|e| e.value().clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
