//! Utilities for operating on a link/interface/device

use futures::TryStreamExt;
use netlink_packet_route::{
    link::nlas::{Info, InfoKind, Nla},
    LinkMessage,
};
use rtnetlink::Handle;

/// The parts of a link message callers care about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Kernel link index
    pub index: u32,
    /// Interface name
    pub name: String,
    /// `IFF_*` flags
    pub flags: u32,
    /// Hardware address, if the link type has one
    pub mac: Option<String>,
    /// Link MTU
    pub mtu: Option<u32>,
}

impl Link {
    /// Check if the link is administratively up
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn is_up(&self) -> bool {
        self.flags & (libc::IFF_UP as u32) != 0
    }
}

impl From<LinkMessage> for Link {
    fn from(message: LinkMessage) -> Self {
        let mut link = Self {
            index: message.header.index,
            name: String::new(),
            flags: message.header.flags,
            mac: None,
            mtu: None,
        };
        for nla in message.nlas {
            match nla {
                Nla::IfName(name) => link.name = name,
                Nla::Address(bytes) if !bytes.is_empty() => {
                    link.mac = Some(
                        bytes
                            .iter()
                            .map(|byte| format!("{byte:02x}"))
                            .collect::<Vec<_>>()
                            .join(":"),
                    );
                }
                Nla::Mtu(mtu) => link.mtu = Some(mtu),
                _ => {}
            }
        }
        link
    }
}

/// Bring up a link by its link index
pub async fn link_up(rt_handle: &Handle, link_index: u32) -> Result<(), rtnetlink::Error> {
    log::trace!("Bringing up link {}", link_index);
    rt_handle.link().set(link_index).up().execute().await
}

/// Set the MTU of a link
pub async fn link_set_mtu(
    rt_handle: &Handle,
    link_index: u32,
    mtu: u32,
) -> Result<(), rtnetlink::Error> {
    log::trace!("Setting MTU of link {} to {}", link_index, mtu);
    rt_handle.link().set(link_index).mtu(mtu).execute().await
}

/// Create a new WireGuard link
pub async fn wireguard_add(rt_handle: &Handle, link_name: &str) -> Result<(), rtnetlink::Error> {
    log::trace!("Creating WireGuard link {}", link_name);
    let mut request = rt_handle.link().add();
    let message = request.message_mut();
    message
        .nlas
        .push(Nla::Info(vec![Info::Kind(InfoKind::Wireguard)]));
    message.nlas.push(Nla::IfName(link_name.to_owned()));
    request.execute().await.map_err(|err| {
        log::error!("Failed to create WireGuard link {}", link_name);
        log::error!("{}", err);
        err
    })
}

/// Delete a link by its link index
pub async fn link_del(rt_handle: &Handle, link_index: u32) -> Result<(), rtnetlink::Error> {
    log::trace!("Deleting link {}", link_index);
    rt_handle
        .link()
        .del(link_index)
        .execute()
        .await
        .map_err(|err| {
            log::error!("Failed to delete link {}", link_index);
            log::error!("{}", err);
            err
        })
}

/// Find a link by its name.
///
/// This walks a full link dump instead of asking the kernel for the name directly,
/// so a missing link is reported as `None` rather than as a netlink error.
pub async fn find_link(rt_handle: &Handle, link_name: &str) -> Result<Option<Link>, rtnetlink::Error> {
    let mut links = rt_handle.link().get().execute();
    while let Some(message) = links.try_next().await? {
        let link = Link::from(message);
        if link.name == link_name {
            return Ok(Some(link));
        }
    }
    Ok(None)
}

/// Get a link by its link index
pub async fn get_link(rt_handle: &Handle, link_index: u32) -> Result<Option<Link>, rtnetlink::Error> {
    Ok(rt_handle
        .link()
        .get()
        .match_index(link_index)
        .execute()
        .try_next()
        .await?
        .map(Link::from))
}

/// Poll a link until it reports as up, giving up once `timeout` has passed.
///
/// Returns the link if it came up in time.
#[cfg(feature = "tokio")]
pub async fn wait_until_up(
    rt_handle: &Handle,
    link_index: u32,
    timeout: std::time::Duration,
    interval: std::time::Duration,
) -> Result<Option<Link>, rtnetlink::Error> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(link) = get_link(rt_handle, link_index).await? {
            if link.is_up() {
                return Ok(Some(link));
            }
        }
        if tokio::time::Instant::now() >= deadline {
            log::debug!("Link {} did not come up within {:?}", link_index, timeout);
            return Ok(None);
        }
        tokio::time::sleep(interval).await;
    }
}
