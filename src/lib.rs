//! # wgmesh library
//!
//! *Note: the binaries live in `src/wgmesh-node.rs` and `src/wgmesh-cni.rs`.*
//!
//! - [`service`]: address allocation and peer registry service, composed from [`ip_pool`] and [`registry`]
//! - [`rpc`]: the JSON-over-HTTP facade for that service, plus a client for it
//! - [`cni`]: the chained container network plugin that attaches WireGuard interfaces

#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod cni;
pub mod registry;
pub mod rpc;
pub mod service;
