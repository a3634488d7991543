//! Code shared by the wgmesh binaries

pub mod logging;
