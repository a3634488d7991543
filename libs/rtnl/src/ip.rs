//! Utilities for manipulating the addresses assigned to links

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use futures::TryStreamExt;
use ipnet::IpNet;
use netlink_packet_route::address::nlas::Nla;
use rtnetlink::Handle;

/// Add an IP address to a link
pub async fn addr_add(
    ip_addr: IpAddr,
    prefix_len: u8,
    rt_handle: &Handle,
    link_index: u32,
) -> Result<(), rtnetlink::Error> {
    log::trace!("Adding address {} to link {}", ip_addr, link_index);
    rt_handle
        .address()
        .add(link_index, ip_addr, prefix_len)
        .execute()
        .await
        .map_err(|err| {
            log::error!("Failed to add address {} to link {}", ip_addr, link_index);
            log::error!("{}", err);
            err
        })
}

/// List every address assigned to a link
pub async fn addr_list(rt_handle: &Handle, link_index: u32) -> Result<Vec<IpNet>, rtnetlink::Error> {
    let mut addresses = Vec::new();
    let mut messages = rt_handle
        .address()
        .get()
        .set_link_index_filter(link_index)
        .execute();

    while let Some(message) = messages.try_next().await? {
        let prefix_len = message.header.prefix_len;
        for nla in message.nlas {
            if let Nla::Address(bytes) = nla {
                if let Some(net) = bytes_to_net(&bytes, prefix_len) {
                    addresses.push(net);
                }
            }
        }
    }

    log::trace!("Link {} has addresses {:?}", link_index, addresses);
    Ok(addresses)
}

/// Build a network from raw address bytes as found in an address message
fn bytes_to_net(bytes: &[u8], prefix_len: u8) -> Option<IpNet> {
    let addr = match bytes.len() {
        4 => IpAddr::V4(Ipv4Addr::from(<[u8; 4]>::try_from(bytes).ok()?)),
        16 => IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(bytes).ok()?)),
        _ => return None,
    };
    IpNet::new(addr, prefix_len).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_net() {
        assert_eq!(
            bytes_to_net(&[10, 0, 0, 7], 24),
            Some("10.0.0.7/24".parse().unwrap())
        );
        let v6: Ipv6Addr = "fd00::9".parse().unwrap();
        assert_eq!(
            bytes_to_net(&v6.octets(), 128),
            Some("fd00::9/128".parse().unwrap())
        );
        assert_eq!(bytes_to_net(&[1, 2, 3], 8), None);
        assert_eq!(bytes_to_net(&[10, 0, 0, 7], 40), None);
    }
}
