//! Chained container network plugin
//!
//! Attaches a WireGuard interface inside the container's network namespace, registers
//! the container with the node manager and prepends the new interface to the chain result.

use crate::rpc::{self, Code, RpcClient};

pub mod attach;
pub mod config;
pub mod driver;
pub mod env;
pub mod types;

pub use attach::Attacher;
pub use config::PluginConf;
pub use driver::{InterfaceDriver, NetlinkDriver};
pub use env::{CmdArgs, Command};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Incompatible CNI version {0}")]
    IncompatibleVersion(String),
    #[error("{0}")]
    InvalidEnvironment(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{0}")]
    Config(String),
    #[error("Must be called as a chained plugin")]
    ChainOrder,
    #[error("Previous result has no container addresses")]
    NoAddress,
    #[error(transparent)]
    Namespace(#[from] rtnl::netns::Error),
    #[error("{0}")]
    Interface(String),
    #[error("Address pool exhausted: {0}")]
    AllocationExhausted(String),
    #[error("Address pool not found: {0}")]
    PoolNotFound(String),
    #[error("Verification failed: {0}")]
    Verification(String),
    #[error("Peer identity in use: {0}")]
    IdentityInUse(String),
    #[error("Node manager request failed: {0}")]
    Rpc(rpc::Error),
}

impl Error {
    /// Numeric code reported to the runtime
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Error::IncompatibleVersion(_) => 1,
            Error::InvalidEnvironment(_) => 4,
            Error::Io(_) => 5,
            Error::Encode(_) => 6,
            Error::Config(_) => 7,
            Error::Rpc(_) => 11,
            Error::ChainOrder => 100,
            Error::NoAddress => 101,
            Error::Namespace(_) => 102,
            Error::Interface(_) => 103,
            Error::AllocationExhausted(_) => 104,
            Error::PoolNotFound(_) => 105,
            Error::Verification(_) => 106,
            Error::IdentityInUse(_) => 107,
        }
    }
}

impl From<rpc::Error> for Error {
    fn from(error: rpc::Error) -> Self {
        match error {
            rpc::Error::Status(status) if status.code == Code::ResourceExhausted => {
                Error::AllocationExhausted(status.message)
            }
            rpc::Error::Status(status) if status.code == Code::NotFound => {
                Error::PoolNotFound(status.message)
            }
            other => Error::Rpc(other),
        }
    }
}

/// Run one plugin invocation against the node manager and the kernel.
///
/// Returns the document to print on success.
pub async fn execute(args: &CmdArgs, stdin: &[u8]) -> Result<String, Error> {
    let conf = match args.command {
        Command::Version => return version(stdin),
        _ => PluginConf::parse(stdin)?,
    };
    let client = RpcClient::new(&conf.node_manager_addr, conf.timeout())?;
    let attacher = Attacher::new(NetlinkDriver, client);

    log::debug!(
        "{:?} for container {} in {:?}",
        args.command,
        args.container_id,
        args.netns
    );
    match args.command {
        Command::Add => {
            let result = attacher.add(args, &conf).await?;
            Ok(serde_json::to_string(&result)?)
        }
        Command::Del => {
            attacher.delete(args, &conf).await?;
            Ok(String::new())
        }
        Command::Check => {
            if conf.cni_version.starts_with("0.3.") {
                return Err(Error::IncompatibleVersion(format!(
                    "{} does not support CHECK",
                    conf.cni_version
                )));
            }
            attacher.check(args, &conf).await?;
            Ok(String::new())
        }
        Command::Version => version(stdin),
    }
}

/// Versions document, answering in the caller's version when it sent one
fn version(stdin: &[u8]) -> Result<String, Error> {
    let version =
        config::probe_version(stdin).unwrap_or_else(|| types::DEFAULT_VERSION.to_owned());
    Ok(serde_json::to_string(&types::VersionResult::new(&version))?)
}
