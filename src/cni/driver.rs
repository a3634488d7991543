//! Kernel side of the attacher: WireGuard links inside a container namespace

use std::{path::Path, time::Duration};

use ipnet::IpNet;
use rtnetlink::Handle;
use rtnl::link::Link;

use super::Error;

/// How often a fresh link is checked for readiness
const READINESS_INTERVAL: Duration = Duration::from_millis(25);

/// What to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSpec {
    pub name: String,
    pub mtu: Option<u32>,
    /// Address assigned to the link
    pub address: IpNet,
    /// Routes sent through the link
    pub routes: Vec<IpNet>,
    /// How long to wait for the link to come up
    pub readiness_timeout: Duration,
}

/// A link as seen inside the namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceState {
    pub index: u32,
    pub name: String,
    pub mac: Option<String>,
    pub up: bool,
    pub addresses: Vec<IpNet>,
}

/// Creates, removes and inspects interfaces in a network namespace.
///
/// Calls block for the duration of the kernel work and are run off the async runtime.
pub trait InterfaceDriver: Send + Sync + 'static {
    /// Create and configure an interface.
    ///
    /// On error nothing created by this call may be left behind.
    fn create(&self, netns: &Path, spec: &InterfaceSpec) -> Result<InterfaceState, Error>;

    /// Remove an interface, returning its state just before removal.
    ///
    /// A missing namespace or interface is `Ok(None)`.
    fn destroy(&self, netns: &Path, name: &str) -> Result<Option<InterfaceState>, Error>;

    /// Read an interface without changing anything
    fn inspect(&self, netns: &Path, name: &str) -> Result<Option<InterfaceState>, Error>;
}

/// [`InterfaceDriver`] backed by rtnetlink
#[derive(Debug, Clone, Copy, Default)]
pub struct NetlinkDriver;

fn interface_error(context: &str) -> impl FnOnce(rtnetlink::Error) -> Error + '_ {
    move |error| Error::Interface(format!("{context}: {error}"))
}

async fn read_state(handle: &Handle, link: Link) -> Result<InterfaceState, Error> {
    let addresses = rtnl::ip::addr_list(handle, link.index)
        .await
        .map_err(interface_error("Failed to list addresses"))?;
    Ok(InterfaceState {
        up: link.is_up(),
        index: link.index,
        name: link.name,
        mac: link.mac,
        addresses,
    })
}

async fn configure(handle: &Handle, index: u32, spec: &InterfaceSpec) -> Result<Link, Error> {
    if let Some(mtu) = spec.mtu {
        rtnl::link::link_set_mtu(handle, index, mtu)
            .await
            .map_err(interface_error("Failed to set MTU"))?;
    }
    rtnl::ip::addr_add(spec.address.addr(), spec.address.prefix_len(), handle, index)
        .await
        .map_err(interface_error("Failed to assign address"))?;
    rtnl::link::link_up(handle, index)
        .await
        .map_err(interface_error("Failed to bring link up"))?;

    let link = rtnl::link::wait_until_up(handle, index, spec.readiness_timeout, READINESS_INTERVAL)
        .await
        .map_err(interface_error("Failed to read link state"))?
        .ok_or_else(|| {
            Error::Interface(format!(
                "{} did not come up within {:?}",
                spec.name, spec.readiness_timeout
            ))
        })?;

    for route in &spec.routes {
        rtnl::route::route_add(*route, handle, index)
            .await
            .map_err(interface_error("Failed to add peer route"))?;
    }
    Ok(link)
}

impl InterfaceDriver for NetlinkDriver {
    fn create(&self, netns: &Path, spec: &InterfaceSpec) -> Result<InterfaceState, Error> {
        let spec = spec.clone();
        rtnl::netns::run_in(netns, move |handle| async move {
            rtnl::link::wireguard_add(&handle, &spec.name)
                .await
                .map_err(interface_error("Failed to create WireGuard link"))?;
            let link = rtnl::link::find_link(&handle, &spec.name)
                .await
                .map_err(interface_error("Failed to look up new link"))?
                .ok_or_else(|| Error::Interface(format!("{} vanished after creation", spec.name)))?;

            match configure(&handle, link.index, &spec).await {
                Ok(link) => read_state(&handle, link).await,
                Err(error) => {
                    log::debug!("Rolling back {} after: {}", spec.name, error);
                    if let Err(rollback) = rtnl::link::link_del(&handle, link.index).await {
                        log::error!("Failed to roll back {}: {}", spec.name, rollback);
                    }
                    Err(error)
                }
            }
        })?
    }

    fn destroy(&self, netns: &Path, name: &str) -> Result<Option<InterfaceState>, Error> {
        if !rtnl::netns::exists(netns) {
            log::debug!("Namespace {} is already gone", netns.display());
            return Ok(None);
        }
        let name = name.to_owned();
        rtnl::netns::run_in(netns, move |handle| async move {
            let Some(link) = rtnl::link::find_link(&handle, &name)
                .await
                .map_err(interface_error("Failed to look up link"))?
            else {
                return Ok::<_, Error>(None);
            };
            let state = read_state(&handle, link).await?;
            rtnl::link::link_del(&handle, state.index)
                .await
                .map_err(interface_error("Failed to delete link"))?;
            Ok(Some(state))
        })?
    }

    fn inspect(&self, netns: &Path, name: &str) -> Result<Option<InterfaceState>, Error> {
        let name = name.to_owned();
        rtnl::netns::run_in(netns, move |handle| async move {
            match rtnl::link::find_link(&handle, &name)
                .await
                .map_err(interface_error("Failed to look up link"))?
            {
                Some(link) => read_state(&handle, link).await.map(Some),
                None => Ok(None),
            }
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destroy_in_missing_namespace() {
        let removed = NetlinkDriver
            .destroy(Path::new("/nonexistent/netns/c1"), "wg0")
            .unwrap();
        assert!(removed.is_none());
    }

    #[test]
    fn test_inspect_in_missing_namespace() {
        let error = NetlinkDriver
            .inspect(Path::new("/nonexistent/netns/c1"), "wg0")
            .unwrap_err();
        assert_eq!(error.code(), 102);
    }
}
