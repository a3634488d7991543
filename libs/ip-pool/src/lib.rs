#![doc = include_str!("../README.md")]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod allocator;
mod error;
mod prefix;

pub use allocator::{Allocation, IpAllocator, IpVersion, PoolUsage};
pub use error::Error;
pub use prefix::Prefix;
