//! The allocation and peer registry service
//!
//! [`MeshService`] composes the address allocator with the peer registry. It is
//! constructed once from a validated [`ServiceConfig`] and shared by every RPC handler.

use std::{
    net::IpAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use ip_pool::{Allocation, IpAllocator};
use ipnet::IpNet;
use wgmesh_metrics::{Metrics, PoolSample, PoolUsageCollector};

use crate::{
    registry::{Peer, PeerRegistry, PersistenceWriter},
    rpc::{self, NodeManager, Status},
};

mod config;
pub use config::{Mode, PoolConfig, ServiceConfig};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Pool(#[from] ip_pool::Error),
    #[error("Failed to prepare data directory {0}: {1}")]
    DataDir(PathBuf, std::io::Error),
    #[error(transparent)]
    Metrics(#[from] prometheus::Error),
}

/// Allocator and registry behind one handle
#[derive(Clone)]
pub struct MeshService {
    allocator: Arc<IpAllocator>,
    registry: PeerRegistry,
    metrics: Metrics,
    mode: Mode,
}

impl MeshService {
    /// Construct the service.
    ///
    /// When the config names a data directory, the registry is seeded from the
    /// persistence file and the returned writer must be spawned.
    pub fn new(
        config: ServiceConfig,
        metrics: Metrics,
    ) -> Result<(Self, Option<PersistenceWriter>), Error> {
        config.validate()?;

        let allocator = Arc::new(IpAllocator::new(
            config
                .pools
                .iter()
                .map(|pool| (pool.name.clone(), pool.prefix))
                .collect(),
        )?);

        // Publish pool usage, sampled fresh on every scrape
        let sampled = Arc::clone(&allocator);
        metrics.register(Box::new(PoolUsageCollector::new(move || {
            sampled
                .usage()
                .into_iter()
                .map(|usage| PoolSample {
                    pool: usage.name,
                    used: usage.used,
                    free: usage.free,
                })
                .collect()
        })?))?;

        let (registry, writer) = match config.persist_file()? {
            Some(path) => {
                let (registry, writer) = PeerRegistry::persistent(path);
                (registry, Some(writer))
            }
            None => (PeerRegistry::in_memory(), None),
        };

        // Addresses already handed to known peers must never be handed out again
        for peer in registry.list() {
            reserve_route(&allocator, peer.route);
        }

        if let Some(peer) = config.self_peer {
            log::info!(
                "Registering local peer {} at {} for {}",
                peer.public_key,
                peer.endpoint,
                peer.route
            );
            reserve_route(&allocator, peer.route);
            registry.set(peer.public_key.clone(), peer);
        }

        Ok((
            Self {
                allocator,
                registry,
                metrics,
                mode: config.mode,
            },
            writer,
        ))
    }

    /// Allocate an address from `pool`, or from the default pool when `None` or empty
    pub fn allocate(&self, pool: Option<&str>) -> Result<Allocation, Status> {
        let allocation = self.allocator.alloc(pool)?;
        log::debug!(
            "Allocated {}/{} from {}",
            allocation.address,
            allocation.prefix_len,
            pool.filter(|pool| !pool.is_empty()).unwrap_or("the default pool")
        );
        Ok(allocation)
    }

    /// Return an address to its pool
    #[must_use]
    pub fn release_address(&self, address: IpAddr) -> bool {
        let released = self.allocator.release(address);
        if !released {
            log::debug!("Release of unallocated address {} ignored", address);
        }
        released
    }

    /// Register or overwrite a peer
    pub fn register_peer(&self, peer: Peer) -> Result<(), Status> {
        if peer.public_key.is_empty() {
            return Err(Status::invalid_argument("PublicKey must not be empty"));
        }
        if peer.endpoint.is_empty() {
            return Err(Status::invalid_argument("Endpoint must not be empty"));
        }
        self.registry.set(peer.public_key.clone(), peer);
        Ok(())
    }

    /// Drop a peer from the registry. Returns whether it existed
    pub fn unregister_peer(&self, public_key: &str) -> bool {
        self.registry.remove(public_key).is_some()
    }

    #[must_use]
    pub fn list_peers(&self) -> Vec<Peer> {
        self.registry.list()
    }

    #[must_use]
    pub fn lookup_peer(&self, public_key: &str) -> Option<Peer> {
        self.registry.get(public_key)
    }

    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }
}

/// Mark a host route's address as used if it falls inside a pool
fn reserve_route(allocator: &IpAllocator, route: IpNet) {
    if route.prefix_len() != route.max_prefix_len() {
        return;
    }
    match allocator.reserve(route.addr()) {
        Ok(()) => log::debug!("Reserved {} for an existing peer", route.addr()),
        Err(ip_pool::Error::OutOfRange(_) | ip_pool::Error::AlreadyAllocated(_)) => {}
        Err(error) => log::warn!("Could not reserve {}: {}", route.addr(), error),
    }
}

impl NodeManager for MeshService {
    async fn alloc(&self, pool: Option<&str>) -> Result<Allocation, rpc::Error> {
        Ok(self.allocate(pool)?)
    }

    async fn release(&self, address: IpAddr) -> Result<bool, rpc::Error> {
        Ok(self.release_address(address))
    }

    async fn register(&self, peer: Peer) -> Result<(), rpc::Error> {
        Ok(self.register_peer(peer)?)
    }

    async fn unregister(&self, public_key: &str) -> Result<(), rpc::Error> {
        self.unregister_peer(public_key);
        Ok(())
    }

    async fn get_peer(&self, public_key: &str) -> Result<Option<Peer>, rpc::Error> {
        Ok(self.lookup_peer(public_key))
    }

    async fn peers(&self) -> Result<Vec<Peer>, rpc::Error> {
        Ok(self.list_peers())
    }
}

/// Name of the persistence file for `mode` inside `data_dir`
#[must_use]
pub fn persist_path(data_dir: &Path, mode: Mode) -> PathBuf {
    data_dir.join(match mode {
        Mode::Cluster => "cluster-wireguard.json",
        Mode::Node => "node-wireguard.json",
    })
}
