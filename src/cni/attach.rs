use std::{
    collections::BTreeSet,
    future::Future,
    net::IpAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use ipnet::IpNet;
use tokio::time::Instant;

use super::{
    config::{AddressSource, PluginConf},
    driver::{InterfaceDriver, InterfaceSpec, InterfaceState},
    env::CmdArgs,
    types::{CniResult, Interface, IpConfig},
    Error,
};
use crate::{
    registry::Peer,
    rpc::{self, NodeManager},
};

fn host_prefix(address: IpAddr) -> IpNet {
    IpNet::from(address)
}

/// Bound an RPC call by the invocation deadline
async fn within<T, F>(deadline: Instant, call: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, rpc::Error>>,
{
    match tokio::time::timeout_at(deadline, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(rpc::Error::DeadlineExceeded.into()),
    }
}

/// Attaches WireGuard interfaces to containers.
///
/// `D` does the kernel work, `M` is the node manager that hands out addresses and tracks peers.
pub struct Attacher<D, M> {
    driver: Arc<D>,
    manager: M,
}

impl<D, M> Attacher<D, M>
where
    D: InterfaceDriver,
    M: NodeManager,
{
    pub fn new(driver: D, manager: M) -> Self {
        Self {
            driver: Arc::new(driver),
            manager,
        }
    }

    /// Run a blocking driver call off the runtime
    async fn blocking<T, F>(&self, task: F) -> Result<T, Error>
    where
        F: FnOnce(&D) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let driver = Arc::clone(&self.driver);
        tokio::task::spawn_blocking(move || task(driver.as_ref()))
            .await
            .map_err(|error| Error::Interface(format!("Interface worker failed: {error}")))?
    }

    /// Remove an interface during rollback, logging instead of failing
    async fn remove_quietly(&self, netns: &Path, name: &str) {
        let (netns, name) = (netns.to_path_buf(), name.to_owned());
        let target = name.clone();
        match self
            .blocking(move |driver| driver.destroy(&netns, &target))
            .await
        {
            Ok(_) => log::debug!("Rolled back {}", name),
            Err(error) => log::error!("Failed to roll back {}: {}", name, error),
        }
    }

    /// Return an address to the node manager, logging instead of failing
    async fn release_quietly(&self, address: IpAddr) {
        match self.manager.release(address).await {
            Ok(true) => log::debug!("Released {}", address),
            Ok(false) => log::debug!("{} was not allocated", address),
            Err(error) => log::warn!("Failed to release {}: {}", address, error),
        }
    }

    /// Create the interface, waiting for the creation to finish even if the deadline passes
    async fn create(
        &self,
        netns: &Path,
        spec: InterfaceSpec,
        deadline: Instant,
    ) -> Result<InterfaceState, Error> {
        let driver = Arc::clone(&self.driver);
        let path = netns.to_path_buf();
        let name = spec.name.clone();
        let mut task = tokio::task::spawn_blocking(move || driver.create(&path, &spec));

        match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(joined) => joined
                .map_err(|error| Error::Interface(format!("Interface worker failed: {error}")))?,
            Err(_) => {
                log::warn!("Deadline passed while creating {}", name);
                if let Ok(Ok(_)) = task.await {
                    self.remove_quietly(netns, &name).await;
                }
                Err(Error::Interface(format!("Timed out creating {name}")))
            }
        }
    }

    /// Routes advertised by every other peer.
    ///
    /// Fails when `own_key` already advertises a route other than `own_address`, so two
    /// containers never share one identity.
    async fn peer_routes(
        &self,
        own_key: Option<&str>,
        own_address: IpNet,
        deadline: Instant,
    ) -> Result<Vec<IpNet>, Error> {
        let own_route = host_prefix(own_address.addr());
        let mut routes = BTreeSet::new();
        for peer in within(deadline, self.manager.peers()).await? {
            if Some(peer.public_key.as_str()) == own_key {
                if peer.route != own_route {
                    return Err(Error::IdentityInUse(format!(
                        "{} already advertises {}",
                        peer.public_key, peer.route
                    )));
                }
                continue;
            }
            if peer.route != own_route {
                routes.insert(peer.route);
            }
        }
        Ok(routes.into_iter().collect())
    }

    /// Drop the registration advertising one of `addresses`, logging instead of failing
    async fn unregister_quietly(&self, public_key: &str, addresses: &[IpNet]) {
        let registered = match self.manager.get_peer(public_key).await {
            Ok(registered) => registered,
            Err(error) => {
                log::warn!("Failed to look up peer {}: {}", public_key, error);
                return;
            }
        };
        let Some(registered) = registered else {
            return;
        };
        if !addresses
            .iter()
            .any(|address| host_prefix(address.addr()) == registered.route)
        {
            log::debug!(
                "Peer {} now advertises {}, leaving it registered",
                public_key,
                registered.route
            );
            return;
        }
        match self.manager.unregister(public_key).await {
            Ok(()) => log::debug!("Unregistered peer {}", public_key),
            Err(error) => log::warn!("Failed to unregister peer {}: {}", public_key, error),
        }
    }

    /// Handle `ADD`
    pub async fn add(&self, args: &CmdArgs, conf: &PluginConf) -> Result<CniResult, Error> {
        let prev = conf.prev_result.as_ref().ok_or(Error::ChainOrder)?;
        prev.validate_references().map_err(Error::Config)?;
        let first = prev.ips.first().ok_or(Error::NoAddress)?;
        let netns = args
            .netns
            .as_deref()
            .ok_or_else(|| Error::InvalidEnvironment("CNI_NETNS must be set".to_owned()))?;
        let deadline = Instant::now() + conf.timeout();

        // Allocation happens before entering the namespace
        let (address, allocated) = match conf.address_source {
            AddressSource::Allocator => {
                let allocation = within(deadline, self.manager.alloc(conf.pool())).await?;
                (allocation.as_net(), Some(allocation.address))
            }
            AddressSource::PrevResult => (host_prefix(first.address.addr()), None),
        };

        match self.attach(args, conf, prev, netns, address, deadline).await {
            Ok(result) => Ok(result),
            Err(error) => {
                if let Some(allocated) = allocated {
                    self.release_quietly(allocated).await;
                }
                Err(error)
            }
        }
    }

    async fn attach(
        &self,
        args: &CmdArgs,
        conf: &PluginConf,
        prev: &CniResult,
        netns: &Path,
        address: IpNet,
        deadline: Instant,
    ) -> Result<CniResult, Error> {
        let peer = conf.peer();
        let routes = self
            .peer_routes(peer.as_ref().map(|p| p.public_key.as_str()), address, deadline)
            .await?;

        let spec = InterfaceSpec {
            name: conf.interface_name.clone(),
            mtu: conf.mtu,
            address,
            routes,
            readiness_timeout: conf.readiness_timeout(),
        };
        let state = self.create(netns, spec, deadline).await?;
        log::info!(
            "Attached {} ({}) to container {}",
            state.name,
            address,
            args.container_id
        );

        if let Some(peer) = peer {
            let registration = Peer {
                public_key: peer.public_key,
                endpoint: peer.endpoint,
                route: host_prefix(address.addr()),
                interface_index: Some(state.index),
            };
            if let Err(error) = within(deadline, self.manager.register(registration)).await {
                self.remove_quietly(netns, &state.name).await;
                return Err(error);
            }
        }

        let mut result = prev.clone();
        result.prepend_interface(
            Interface {
                name: state.name,
                mac: state.mac,
                sandbox: Some(netns.display().to_string()),
            },
            IpConfig {
                version: None,
                address,
                gateway: None,
                interface: Some(0),
            },
        );
        Ok(result.into_version(&conf.cni_version))
    }

    /// Handle `DEL`. Missing state is never an error
    pub async fn delete(&self, args: &CmdArgs, conf: &PluginConf) -> Result<(), Error> {
        let Some(netns) = args.netns.clone().filter(|path| !path.as_os_str().is_empty()) else {
            log::debug!("No namespace for container {}, nothing to do", args.container_id);
            return Ok(());
        };

        let name = conf.interface_name.clone();
        let removed = self
            .blocking(move |driver| driver.destroy(&netns, &name))
            .await?;
        let Some(removed) = removed else {
            log::debug!(
                "{} not present for container {}",
                conf.interface_name,
                args.container_id
            );
            return Ok(());
        };

        log::info!("Removed {} from container {}", removed.name, args.container_id);
        if let Some(peer) = conf.peer() {
            self.unregister_quietly(&peer.public_key, &removed.addresses)
                .await;
        }
        if conf.address_source == AddressSource::Allocator {
            for address in removed.addresses {
                self.release_quietly(address.addr()).await;
            }
        }
        Ok(())
    }

    /// Handle `CHECK`. Never changes anything
    pub async fn check(&self, args: &CmdArgs, conf: &PluginConf) -> Result<(), Error> {
        let prev = conf.prev_result.as_ref().ok_or(Error::ChainOrder)?;
        let netns: PathBuf = args
            .netns
            .clone()
            .ok_or_else(|| Error::InvalidEnvironment("CNI_NETNS must be set".to_owned()))?;
        let name = conf.interface_name.clone();

        let display = netns.display().to_string();
        let state = self
            .blocking(move |driver| driver.inspect(&netns, &name))
            .await?
            .ok_or_else(|| {
                Error::Verification(format!(
                    "{} not found in {}",
                    conf.interface_name, display
                ))
            })?;
        if !state.up {
            return Err(Error::Verification(format!("{} is down", state.name)));
        }

        for expected in prev.ips_on(&conf.interface_name) {
            if !state
                .addresses
                .iter()
                .any(|assigned| assigned.addr() == expected.address.addr())
            {
                return Err(Error::Verification(format!(
                    "{} is missing address {}",
                    state.name, expected.address
                )));
            }
        }

        if let Some(peer) = conf.peer() {
            let registered = self
                .manager
                .get_peer(&peer.public_key)
                .await?
                .ok_or_else(|| {
                    Error::Verification(format!("Peer {} is not registered", peer.public_key))
                })?;
            if registered.endpoint != peer.endpoint {
                return Err(Error::Verification(format!(
                    "Peer {} is registered at {} instead of {}",
                    peer.public_key, registered.endpoint, peer.endpoint
                )));
            }
            if !state
                .addresses
                .iter()
                .any(|assigned| registered.route.contains(&assigned.addr()))
            {
                return Err(Error::Verification(format!(
                    "Peer {} route {} does not cover {}",
                    peer.public_key, registered.route, state.name
                )));
            }
        }

        log::debug!("{} in container {} checks out", state.name, args.container_id);
        Ok(())
    }
}
