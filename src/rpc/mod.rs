//! JSON-over-HTTP facade for the allocation and peer registry service
//!
//! Every method is a `POST` to its own path with a JSON request body. Failures are
//! returned as a [`Status`] body with a matching HTTP status code.

use std::net::IpAddr;

use hyper::StatusCode;
use ip_pool::Allocation;

use crate::registry::Peer;

pub mod client;
pub mod server;
pub mod types;

pub use client::RpcClient;

pub const ALLOC_PATH: &str = "/wgmesh.ipam.v1.IpamService/Alloc";
pub const RELEASE_PATH: &str = "/wgmesh.ipam.v1.IpamService/Release";
pub const REGISTER_PATH: &str = "/wgmesh.wireguard.v1.WireguardService/Register";
pub const UNREGISTER_PATH: &str = "/wgmesh.wireguard.v1.WireguardService/Unregister";
pub const PEERS_PATH: &str = "/wgmesh.wireguard.v1.WireguardService/Peers";
pub const GET_PEER_PATH: &str = "/wgmesh.wireguard.v1.WireguardService/GetPeer";

/// Machine readable failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    InvalidArgument,
    NotFound,
    ResourceExhausted,
    Unimplemented,
    Internal,
}

impl Code {
    /// HTTP status used to carry this code
    #[must_use]
    pub fn http_status(self) -> StatusCode {
        match self {
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A structured RPC failure, as sent over the wire
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }
}

impl From<ip_pool::Error> for Status {
    fn from(error: ip_pool::Error) -> Self {
        let code = match &error {
            ip_pool::Error::Exhausted { .. } => Code::ResourceExhausted,
            ip_pool::Error::PoolNotFound(_) => Code::NotFound,
            ip_pool::Error::OutOfRange(_) | ip_pool::Error::AlreadyAllocated(_) => {
                Code::InvalidArgument
            }
            ip_pool::Error::NoPools
            | ip_pool::Error::DuplicatePool(_)
            | ip_pool::Error::OverlappingPools(..) => Code::Internal,
        };
        Self::new(code, error.to_string())
    }
}

/// Errors seen by callers of the facade
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Status(#[from] Status),
    #[error("Invalid node manager address {0}: {1}")]
    InvalidAddress(String, hyper::http::uri::InvalidUri),
    #[error(transparent)]
    Transport(#[from] hyper::Error),
    #[error(transparent)]
    Http(#[from] hyper::http::Error),
    #[error(transparent)]
    Encoding(#[from] serde_json::Error),
    #[error("Invalid response from node manager: {0}")]
    InvalidResponse(String),
    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// The status code carried by this error, if the server produced one
    #[must_use]
    pub fn code(&self) -> Option<Code> {
        match self {
            Error::Status(status) => Some(status.code),
            _ => None,
        }
    }
}

/// Operations the container plugin needs from the node manager.
///
/// Implemented in-process by [`crate::service::MeshService`] and over the network by [`RpcClient`].
#[allow(async_fn_in_trait)]
pub trait NodeManager {
    /// Allocate an address from `pool`, or from the default pool
    async fn alloc(&self, pool: Option<&str>) -> Result<Allocation, Error>;

    /// Return an address to its pool. Returns whether anything was freed
    async fn release(&self, address: IpAddr) -> Result<bool, Error>;

    /// Register or update a peer
    async fn register(&self, peer: Peer) -> Result<(), Error>;

    /// Remove a peer. Unknown identities are not an error
    async fn unregister(&self, public_key: &str) -> Result<(), Error>;

    /// Look up a single peer
    async fn get_peer(&self, public_key: &str) -> Result<Option<Peer>, Error>;

    /// List every registered peer
    async fn peers(&self) -> Result<Vec<Peer>, Error>;
}
