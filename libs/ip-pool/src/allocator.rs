use std::{
    net::IpAddr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use ipnet::IpNet;
use rustc_hash::FxHashMap;

use crate::{error::Error, prefix::Prefix};

/// IP protocol version of an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

/// An address handed out by the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// The allocated address
    pub address: IpAddr,
    /// Prefix length of the pool the address was taken from
    pub prefix_len: u8,
    /// Address family
    pub version: IpVersion,
}

impl Allocation {
    /// The allocation expressed as a CIDR (address plus pool prefix length)
    #[must_use]
    pub fn as_net(&self) -> IpNet {
        // The prefix length always comes from a valid pool of the same family
        IpNet::new(self.address, self.prefix_len).unwrap_or_else(|_| IpNet::from(self.address))
    }
}

/// Point-in-time usage of one pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolUsage {
    pub name: String,
    pub prefix: IpNet,
    pub used: u128,
    pub free: u128,
}

/// A named pool with its own lock
#[derive(Debug)]
struct Pool {
    name: String,
    prefix: Mutex<Prefix>,
}

impl Pool {
    fn lock(&self) -> MutexGuard<'_, Prefix> {
        // Prefix operations never leave the bookkeeping half-updated, so a poisoned lock is still usable
        self.prefix.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn overlaps(a: IpNet, b: IpNet) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// Allocates addresses from a fixed set of named pools.
///
/// The first pool passed to [`IpAllocator::new`] is used when no pool name is given.
#[derive(Debug)]
pub struct IpAllocator {
    /// Pools in configuration order
    pools: Vec<Pool>,
    /// Pool name to position in `pools`
    index: FxHashMap<String, usize>,
}

impl IpAllocator {
    /// Construct a new `IpAllocator` from `(name, prefix)` pairs
    pub fn new(pools: Vec<(String, IpNet)>) -> Result<Self, Error> {
        if pools.is_empty() {
            return Err(Error::NoPools);
        }

        let mut index = FxHashMap::default();
        let mut built = Vec::with_capacity(pools.len());
        for (position, (name, cidr)) in pools.into_iter().enumerate() {
            if index.insert(name.clone(), position).is_some() {
                return Err(Error::DuplicatePool(name));
            }
            // Pools share no addresses, so every address has exactly one owner
            let cidr = cidr.trunc();
            if let Some(other) = built
                .iter()
                .find(|pool: &&Pool| overlaps(pool.lock().cidr(), cidr))
            {
                return Err(Error::OverlappingPools(other.name.clone(), name));
            }
            log::debug!("Adding address pool {} ({})", name, cidr);
            built.push(Pool {
                name,
                prefix: Mutex::new(Prefix::new(cidr)),
            });
        }

        Ok(Self {
            pools: built,
            index,
        })
    }

    /// Name of the pool used when a request does not name one
    #[must_use]
    pub fn default_pool(&self) -> &str {
        &self.pools[0].name
    }

    /// Allocate the next free address from a pool
    #[profiling::function]
    pub fn alloc(&self, pool: Option<&str>) -> Result<Allocation, Error> {
        let pool = self.find(pool)?;
        let mut prefix = pool.lock();
        let cidr = prefix.cidr();

        match prefix.allocate() {
            Some(address) => {
                log::debug!("Allocated {} from pool {}", address, pool.name);
                Ok(Allocation {
                    address,
                    prefix_len: cidr.prefix_len(),
                    version: match cidr {
                        IpNet::V4(_) => IpVersion::V4,
                        IpNet::V6(_) => IpVersion::V6,
                    },
                })
            }
            None => {
                log::warn!("Address pool {} is exhausted", pool.name);
                Err(Error::Exhausted {
                    pool: pool.name.clone(),
                    size: prefix.size(),
                })
            }
        }
    }

    /// Mark a specific address as allocated in whichever pool contains it
    pub fn reserve(&self, address: IpAddr) -> Result<(), Error> {
        let pool = self
            .pools
            .iter()
            .find(|pool| pool.lock().contains(&address))
            .ok_or(Error::OutOfRange(address))?;

        if pool.lock().reserve(&address) {
            log::debug!("Reserved {} in pool {}", address, pool.name);
            Ok(())
        } else {
            Err(Error::AlreadyAllocated(address))
        }
    }

    /// Return an address to its pool.
    ///
    /// Releasing an address that is not allocated does nothing. Returns whether an address was freed.
    #[profiling::function]
    pub fn release(&self, address: IpAddr) -> bool {
        for pool in &self.pools {
            let mut prefix = pool.lock();
            if prefix.contains(&address) {
                if prefix.release(&address) {
                    log::debug!("Released {} back to pool {}", address, pool.name);
                    return true;
                }
                log::debug!(
                    "Ignoring release of {} from pool {}: not allocated",
                    address,
                    pool.name
                );
                return false;
            }
        }

        log::debug!("Ignoring release of {}: not part of any pool", address);
        false
    }

    /// Usage of every pool, read from the live bookkeeping
    #[must_use]
    pub fn usage(&self) -> Vec<PoolUsage> {
        self.pools
            .iter()
            .map(|pool| {
                let prefix = pool.lock();
                PoolUsage {
                    name: pool.name.clone(),
                    prefix: prefix.cidr(),
                    used: prefix.used(),
                    free: prefix.free(),
                }
            })
            .collect()
    }

    fn find(&self, pool: Option<&str>) -> Result<&Pool, Error> {
        match pool {
            None | Some("") => Ok(&self.pools[0]),
            Some(name) => self
                .index
                .get(name)
                .map(|position| &self.pools[*position])
                .ok_or_else(|| Error::PoolNotFound(name.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::*;

    fn allocator(pools: &[(&str, &str)]) -> IpAllocator {
        IpAllocator::new(
            pools
                .iter()
                .map(|(name, cidr)| ((*name).to_string(), cidr.parse().unwrap()))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_sequential_allocations_are_distinct_and_in_range() {
        let allocator = allocator(&[("cluster", "10.0.0.0/8")]);
        let cidr: IpNet = "10.0.0.0/8".parse().unwrap();

        let mut seen = HashSet::new();
        for _ in 0..512 {
            let allocation = allocator.alloc(None).unwrap();
            assert!(cidr.contains(&allocation.address));
            assert_eq!(allocation.prefix_len, 8);
            assert_eq!(allocation.version, IpVersion::V4);
            assert!(seen.insert(allocation.address));
        }
    }

    #[test]
    fn test_first_allocation() {
        let allocator = allocator(&[("cluster", "10.0.0.0/8")]);
        let allocation = allocator.alloc(None).unwrap();
        assert_eq!(allocation.address, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(allocation.as_net().to_string(), "10.0.0.1/8");
    }

    #[test]
    fn test_named_pools() {
        let allocator = allocator(&[("v4", "10.0.0.0/24"), ("v6", "fd00::/120")]);
        assert_eq!(allocator.default_pool(), "v4");

        let v6 = allocator.alloc(Some("v6")).unwrap();
        assert_eq!(v6.address, "fd00::1".parse::<IpAddr>().unwrap());
        assert_eq!(v6.prefix_len, 120);
        assert_eq!(v6.version, IpVersion::V6);

        assert!(matches!(
            allocator.alloc(Some("missing")),
            Err(Error::PoolNotFound(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_invalid_construction() {
        assert!(matches!(IpAllocator::new(Vec::new()), Err(Error::NoPools)));
        assert!(matches!(
            IpAllocator::new(vec![
                ("a".to_string(), "10.0.0.0/24".parse().unwrap()),
                ("a".to_string(), "10.1.0.0/24".parse().unwrap()),
            ]),
            Err(Error::DuplicatePool(_))
        ));
    }

    #[test]
    fn test_overlapping_pools_are_rejected() {
        assert!(matches!(
            IpAllocator::new(vec![
                ("a".to_string(), "10.0.0.0/8".parse().unwrap()),
                ("b".to_string(), "10.0.0.0/24".parse().unwrap()),
            ]),
            Err(Error::OverlappingPools(a, b)) if a == "a" && b == "b"
        ));
        assert!(matches!(
            IpAllocator::new(vec![
                ("small".to_string(), "10.1.2.0/24".parse().unwrap()),
                ("large".to_string(), "10.0.0.0/8".parse().unwrap()),
            ]),
            Err(Error::OverlappingPools(_, _))
        ));

        // Adjacent and cross-family pools are fine
        let allocator = allocator(&[
            ("a", "10.0.0.0/24"),
            ("b", "10.0.1.0/24"),
            ("c", "fd00::/120"),
        ]);
        let a = allocator.alloc(Some("a")).unwrap();
        let b = allocator.alloc(Some("b")).unwrap();
        assert_eq!(a.address, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(b.address, "10.0.1.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_exhaustion() {
        let allocator = allocator(&[("tiny", "192.0.2.0/30")]);
        allocator.alloc(None).unwrap();
        allocator.alloc(None).unwrap();
        assert!(matches!(
            allocator.alloc(None),
            Err(Error::Exhausted { size: 2, .. })
        ));
    }

    #[test]
    fn test_release_and_reuse() {
        let allocator = allocator(&[("tiny", "192.0.2.0/30")]);
        let first = allocator.alloc(None).unwrap();
        let second = allocator.alloc(None).unwrap();

        assert!(allocator.release(first.address));
        assert!(!allocator.release(first.address));
        assert!(!allocator.release("198.51.100.1".parse().unwrap()));

        let again = allocator.alloc(None).unwrap();
        assert_eq!(again.address, first.address);
        assert_ne!(again.address, second.address);
    }

    #[test]
    fn test_reserve() {
        let allocator = allocator(&[("cluster", "10.0.0.0/24")]);
        allocator.reserve("10.0.0.1".parse().unwrap()).unwrap();
        assert!(matches!(
            allocator.reserve("10.0.0.1".parse().unwrap()),
            Err(Error::AlreadyAllocated(_))
        ));
        assert!(matches!(
            allocator.reserve("10.9.0.1".parse().unwrap()),
            Err(Error::OutOfRange(_))
        ));
        assert_eq!(
            allocator.alloc(None).unwrap().address,
            "10.0.0.2".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_usage_is_live() {
        let allocator = allocator(&[("cluster", "10.0.0.0/24")]);
        let allocation = allocator.alloc(None).unwrap();
        assert_eq!(allocator.usage()[0].used, 1);
        assert_eq!(allocator.usage()[0].free, 253);

        allocator.release(allocation.address);
        assert_eq!(allocator.usage()[0].used, 0);
        assert_eq!(allocator.usage()[0].free, 254);
    }

    #[test]
    fn test_concurrent_allocations_never_collide() {
        let allocator = Arc::new(allocator(&[("cluster", "10.0.0.0/16")]));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                std::thread::spawn(move || {
                    (0..64)
                        .map(|_| allocator.alloc(None).unwrap().address)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for address in handle.join().unwrap() {
                assert!(seen.insert(address), "{address} was handed out twice");
            }
        }
        assert_eq!(seen.len(), 8 * 64);
        assert_eq!(allocator.usage()[0].used, 8 * 64);
    }
}
