//! In-memory registry of mesh peers, optionally mirrored to a JSON file
//!
//! Writes land in memory synchronously and are immediately visible to readers.
//! Persistence is handled by a single [`PersistenceWriter`] task that is woken
//! through a capacity-one channel, so a burst of updates coalesces into one flush.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use ipnet::IpNet;
use tokio::sync::mpsc::{self, error::TrySendError};

mod persist;
pub use persist::PersistenceWriter;

/// A remote mesh participant
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    /// WireGuard public key, used as the peer's identity
    pub public_key: String,
    /// `host:port` the peer can be reached at
    pub endpoint: String,
    /// Network reachable through this peer
    pub route: IpNet,
    /// Index of the interface the peer is attached to, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_index: Option<u32>,
}

type PeerMap = HashMap<String, Peer>;

/// Concurrent identity -> peer map
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    /// The peers themselves
    peers: Arc<RwLock<PeerMap>>,
    /// Wakes the persistence writer. `None` when nothing is persisted
    flush_signal: Option<mpsc::Sender<()>>,
    /// Number of completed flushes
    flushes: Arc<AtomicU64>,
}

impl PeerRegistry {
    /// Construct a registry that only lives in memory
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            peers: Arc::default(),
            flush_signal: None,
            flushes: Arc::default(),
        }
    }

    /// Construct a registry backed by `path`.
    ///
    /// Any peers already stored in `path` are loaded first. The returned writer must be
    /// spawned for changes to reach the file.
    #[must_use]
    pub fn persistent(path: PathBuf) -> (Self, PersistenceWriter) {
        let peers = Arc::new(RwLock::new(load(&path)));
        let flushes = Arc::new(AtomicU64::new(0));
        let (sender, receiver) = mpsc::channel(1);

        let writer = PersistenceWriter::new(
            path,
            Arc::clone(&peers),
            receiver,
            Arc::clone(&flushes),
        );
        (
            Self {
                peers,
                flush_signal: Some(sender),
                flushes,
            },
            writer,
        )
    }

    /// Insert or overwrite a peer
    pub fn set(&self, identity: String, peer: Peer) {
        let mut peers = self.write();
        log::debug!("Registering peer {} at {}", identity, peer.endpoint);
        peers.insert(identity, peer);
        self.signal_flush();
    }

    /// Remove a peer, returning it if it was present
    pub fn remove(&self, identity: &str) -> Option<Peer> {
        let mut peers = self.write();
        let removed = peers.remove(identity);
        if removed.is_some() {
            log::debug!("Removed peer {}", identity);
            self.signal_flush();
        }
        removed
    }

    /// Look up a peer by identity
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<Peer> {
        self.read().get(identity).cloned()
    }

    /// Snapshot of every registered peer, in no particular order
    #[must_use]
    pub fn list(&self) -> Vec<Peer> {
        self.read().values().cloned().collect()
    }

    /// Number of registered peers
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Number of times the persistence writer has written the file
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Tell the writer a flush is due without waiting for it
    fn signal_flush(&self) {
        if let Some(signal) = &self.flush_signal {
            match signal.try_send(()) {
                Ok(()) => {}
                // A flush is already pending and will pick up this change too
                Err(TrySendError::Full(())) => log::trace!("Flush already pending"),
                Err(TrySendError::Closed(())) => {
                    log::warn!("Peer registry writer has stopped, change will not be persisted");
                }
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PeerMap> {
        self.peers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PeerMap> {
        self.peers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read previously persisted peers. Missing or unreadable files yield an empty map
fn load(path: &Path) -> PeerMap {
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("No peer registry at {}, starting empty", path.display());
            return PeerMap::new();
        }
        Err(error) => {
            log::warn!(
                "Failed to read peer registry {}: {}. Starting empty",
                path.display(),
                error
            );
            return PeerMap::new();
        }
    };

    match serde_json::from_slice::<PeerMap>(&contents) {
        Ok(peers) => {
            log::info!("Loaded {} peers from {}", peers.len(), path.display());
            peers
        }
        Err(error) => {
            log::warn!(
                "Peer registry {} is malformed: {}. Starting empty",
                path.display(),
                error
            );
            PeerMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn peer(public_key: &str, endpoint: &str, route: &str) -> Peer {
        Peer {
            public_key: public_key.to_string(),
            endpoint: endpoint.to_string(),
            route: route.parse().unwrap(),
            interface_index: None,
        }
    }

    #[test]
    fn test_last_writer_wins() {
        let registry = PeerRegistry::in_memory();
        registry.set("x".to_string(), peer("x", "192.0.2.1:51820", "10.0.0.1/32"));
        registry.set("x".to_string(), peer("x", "192.0.2.2:51820", "10.0.0.2/32"));

        let stored = registry.get("x").unwrap();
        assert_eq!(stored.endpoint, "192.0.2.2:51820");
        assert_eq!(stored.route, "10.0.0.2/32".parse::<IpNet>().unwrap());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let registry = PeerRegistry::in_memory();
        assert!(registry.get("nobody").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_and_remove() {
        let registry = PeerRegistry::in_memory();
        registry.set("a".to_string(), peer("a", "192.0.2.1:51820", "10.0.0.1/32"));
        registry.set("b".to_string(), peer("b", "192.0.2.2:51820", "10.0.0.2/32"));

        let mut keys: Vec<_> = registry
            .list()
            .into_iter()
            .map(|peer| peer.public_key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let registry = PeerRegistry::in_memory();
        let handles: Vec<_> = (0..8)
            .map(|thread| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let key = format!("peer-{thread}-{i}");
                        registry.set(key.clone(), peer(&key, "192.0.2.1:51820", "10.0.0.1/32"));
                        assert!(registry.get(&key).is_some());
                        let _ = registry.list();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 8 * 50);
    }

    #[test]
    fn test_seed_from_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster-wireguard.json");
        std::fs::write(
            &path,
            r#"{"k1": {"publicKey": "k1", "endpoint": "198.51.100.7:51820", "route": "10.0.0.7/32"}}"#,
        )
        .unwrap();

        let (registry, _writer) = PeerRegistry::persistent(path);
        assert_eq!(registry.get("k1").unwrap().endpoint, "198.51.100.7:51820");
    }

    #[test]
    fn test_malformed_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster-wireguard.json");
        std::fs::write(&path, "{not json").unwrap();

        let (registry, _writer) = PeerRegistry::persistent(path);
        assert!(registry.is_empty());
    }
}
