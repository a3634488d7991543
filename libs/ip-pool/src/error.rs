use std::net::IpAddr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("At least one address pool must be configured")]
    NoPools,
    #[error("Address pool {0} is defined more than once")]
    DuplicatePool(String),
    #[error("Address pools {0} and {1} overlap")]
    OverlappingPools(String, String),
    #[error("Address pool not found: {0}")]
    PoolNotFound(String),
    #[error("Address pool {pool} exhausted. All {size} addresses allocated")]
    Exhausted { pool: String, size: u128 },
    #[error("Address does not belong to any pool: {0}")]
    OutOfRange(IpAddr),
    #[error("Address already allocated: {0}")]
    AlreadyAllocated(IpAddr),
}
