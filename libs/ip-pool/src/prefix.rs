use std::{
    collections::BTreeSet,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use ipnet::IpNet;

/// A CIDR block and the set of addresses currently handed out from it.
///
/// Addresses are tracked as `u128` for both families so the same ordered
/// bookkeeping works for IPv4 and IPv6.
#[derive(Debug, Clone)]
pub struct Prefix {
    /// The block addresses are allocated from
    cidr: IpNet,
    /// Currently allocated addresses
    allocated: BTreeSet<u128>,
    /// First allocatable address
    first_host: u128,
    /// Last allocatable address
    last_host: u128,
}

impl Prefix {
    /// Construct a new empty `Prefix`
    ///
    /// IPv4 blocks shorter than a /31 never hand out their network or broadcast address.
    /// IPv6 blocks shorter than a /127 never hand out their subnet-router anycast address.
    #[must_use]
    pub fn new(cidr: IpNet) -> Self {
        let cidr = cidr.trunc();
        let (first_host, last_host) = match cidr {
            IpNet::V4(net) => {
                let network = u128::from(u32::from(net.network()));
                let broadcast = u128::from(u32::from(net.broadcast()));
                if net.prefix_len() < 31 {
                    (network + 1, broadcast - 1)
                } else {
                    (network, broadcast)
                }
            }
            IpNet::V6(net) => {
                let network = u128::from(net.network());
                let broadcast = u128::from(net.broadcast());
                if net.prefix_len() < 127 {
                    (network + 1, broadcast)
                } else {
                    (network, broadcast)
                }
            }
        };

        Self {
            cidr,
            allocated: BTreeSet::new(),
            first_host,
            last_host,
        }
    }

    /// Get the CIDR block
    #[must_use]
    pub fn cidr(&self) -> IpNet {
        self.cidr
    }

    /// Check if an address lies within this prefix
    #[must_use]
    pub fn contains(&self, address: &IpAddr) -> bool {
        self.cidr.contains(address)
    }

    /// Check if an address is currently allocated
    #[must_use]
    pub fn is_allocated(&self, address: &IpAddr) -> bool {
        self.to_bits(address)
            .map_or(false, |bits| self.allocated.contains(&bits))
    }

    /// Total number of addresses this prefix can hand out
    #[must_use]
    pub fn size(&self) -> u128 {
        (self.last_host - self.first_host).saturating_add(1)
    }

    /// Number of addresses currently allocated
    #[must_use]
    pub fn used(&self) -> u128 {
        self.allocated.len() as u128
    }

    /// Number of addresses still available
    #[must_use]
    pub fn free(&self) -> u128 {
        self.size() - self.used()
    }

    /// Allocate the lowest free address, if there is one
    #[profiling::function]
    pub fn allocate(&mut self) -> Option<IpAddr> {
        let bits = self.next_free()?;
        self.allocated.insert(bits);
        Some(self.from_bits(bits))
    }

    /// Mark a specific address as allocated.
    ///
    /// Returns `false` if the address is outside of the allocatable range or already taken.
    pub fn reserve(&mut self, address: &IpAddr) -> bool {
        match self.to_bits(address) {
            Some(bits) if (self.first_host..=self.last_host).contains(&bits) => {
                self.allocated.insert(bits)
            }
            _ => false,
        }
    }

    /// Return an address to the free set. Returns `false` if it was not allocated.
    #[profiling::function]
    pub fn release(&mut self, address: &IpAddr) -> bool {
        self.to_bits(address)
            .map_or(false, |bits| self.allocated.remove(&bits))
    }

    /// Find the lowest address in the host range that is not allocated
    fn next_free(&self) -> Option<u128> {
        let mut candidate = self.first_host;
        for &used in self.allocated.range(self.first_host..=self.last_host) {
            if used != candidate {
                return Some(candidate);
            }
            candidate = candidate.checked_add(1)?;
        }
        (candidate <= self.last_host).then_some(candidate)
    }

    fn to_bits(&self, address: &IpAddr) -> Option<u128> {
        match (self.cidr, address) {
            (IpNet::V4(net), IpAddr::V4(addr)) if net.contains(addr) => {
                Some(u128::from(u32::from(*addr)))
            }
            (IpNet::V6(net), IpAddr::V6(addr)) if net.contains(addr) => Some(u128::from(*addr)),
            _ => None,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_bits(&self, bits: u128) -> IpAddr {
        match self.cidr {
            IpNet::V4(_) => IpAddr::V4(Ipv4Addr::from(bits as u32)),
            IpNet::V6(_) => IpAddr::V6(Ipv6Addr::from(bits)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_skips_network_and_broadcast() {
        let mut prefix = Prefix::new("192.0.2.0/30".parse().unwrap());
        assert_eq!(prefix.size(), 2);
        assert_eq!(prefix.allocate(), Some("192.0.2.1".parse().unwrap()));
        assert_eq!(prefix.allocate(), Some("192.0.2.2".parse().unwrap()));
        assert_eq!(prefix.allocate(), None);
    }

    #[test]
    fn test_point_to_point_uses_every_address() {
        let mut prefix = Prefix::new("192.0.2.0/31".parse().unwrap());
        assert_eq!(prefix.allocate(), Some("192.0.2.0".parse().unwrap()));
        assert_eq!(prefix.allocate(), Some("192.0.2.1".parse().unwrap()));
        assert_eq!(prefix.allocate(), None);

        let mut single = Prefix::new("2001:db8::5/128".parse().unwrap());
        assert_eq!(single.allocate(), Some("2001:db8::5".parse().unwrap()));
        assert_eq!(single.allocate(), None);
    }

    #[test]
    fn test_ipv6_skips_anycast() {
        let mut prefix = Prefix::new("2001:db8::/64".parse().unwrap());
        assert_eq!(prefix.allocate(), Some("2001:db8::1".parse().unwrap()));
        assert_eq!(prefix.size(), u128::from(u64::MAX));
    }

    #[test]
    fn test_host_bits_are_truncated() {
        let prefix = Prefix::new("10.1.2.3/16".parse().unwrap());
        assert_eq!(prefix.cidr().to_string(), "10.1.0.0/16");
    }

    #[test]
    fn test_release_fills_gap_first() {
        let mut prefix = Prefix::new("10.0.0.0/29".parse().unwrap());
        let first = prefix.allocate().unwrap();
        let second = prefix.allocate().unwrap();
        let third = prefix.allocate().unwrap();

        assert!(prefix.release(&second));
        assert!(!prefix.is_allocated(&second));
        assert_eq!(prefix.allocate(), Some(second));
        assert!(prefix.is_allocated(&first));
        assert!(prefix.is_allocated(&third));
        assert_eq!(prefix.allocate(), Some("10.0.0.4".parse().unwrap()));
    }

    #[test]
    fn test_release_unknown_address() {
        let mut prefix = Prefix::new("10.0.0.0/29".parse().unwrap());
        assert!(!prefix.release(&"10.0.0.3".parse().unwrap()));
        assert!(!prefix.release(&"172.16.0.1".parse().unwrap()));
        assert!(!prefix.release(&"2001:db8::1".parse().unwrap()));
        assert_eq!(prefix.used(), 0);
    }

    #[test]
    fn test_reserve() {
        let mut prefix = Prefix::new("10.0.0.0/29".parse().unwrap());
        assert!(prefix.reserve(&"10.0.0.1".parse().unwrap()));
        assert!(!prefix.reserve(&"10.0.0.1".parse().unwrap()));
        assert!(!prefix.reserve(&"10.0.0.0".parse().unwrap()));
        assert!(!prefix.reserve(&"10.0.0.7".parse().unwrap()));
        assert_eq!(prefix.allocate(), Some("10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn test_usage_counts() {
        let mut prefix = Prefix::new("10.0.0.0/24".parse().unwrap());
        for _ in 0..10 {
            prefix.allocate().unwrap();
        }
        assert_eq!(prefix.used(), 10);
        assert_eq!(prefix.free(), 244);
    }
}
