use std::{net::SocketAddr, path::PathBuf, str::FromStr};

use ipnet::IpNet;
use wgmesh::{
    registry::Peer,
    service::{Mode, PoolConfig, ServiceConfig},
};

use super::ProfilerArgs;

#[derive(clap::Parser)]
#[clap(author, version, about="WireGuard mesh address allocation and peer registry", long_about = None)]
pub struct Args {
    #[command(flatten)]
    config_data: Option<Config>,

    /// Path to a config file to read
    #[clap(short = 'c', long = "config", conflicts_with = "Config")]
    config_file: Option<PathBuf>,

    #[command(flatten)]
    pub profiler_args: ProfilerArgs,

    /// Enable verbose logging
    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file {0} not found")]
    NotFound(PathBuf),
    #[error("Failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("Failed to parse config file {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
    #[error("No configuration provided. Either use --config to specify a file or set the configuration via CLI args (see --help)")]
    Missing,
}

impl Args {
    pub fn data(&self) -> Result<Config, ConfigError> {
        match self.config_file {
            Some(ref path) => {
                // Read the data from the config file
                let file = std::fs::File::open(path).map_err(|error| match error.kind() {
                    std::io::ErrorKind::NotFound => ConfigError::NotFound(path.clone()),
                    _ => ConfigError::Read(path.clone(), error),
                })?;
                serde_json::from_reader(file).map_err(|error| ConfigError::Parse(path.clone(), error))
            }
            None => self.config_data.clone().ok_or(ConfigError::Missing),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5242))
}

/// Program configuration. Specifiable via either CLI args or a config file
#[derive(Debug, clap::Args, serde::Deserialize, Clone)]
#[group()]
pub struct Config {
    /// Address pool as `name=prefix`. May be repeated, the first pool is the default
    #[clap(long = "pool")]
    pub pools: Vec<PoolConfig>,

    /// Whether this instance serves the whole cluster or a single node
    #[clap(long, value_enum, default_value_t = Mode::Cluster)]
    #[serde(default)]
    pub mode: Mode,

    /// Directory to persist the peer registry in
    #[clap(long)]
    pub data_dir: Option<PathBuf>,

    /// This node's own peer, as `public_key,endpoint,route`
    #[clap(long)]
    pub self_peer: Option<SelfPeer>,

    /// Address to serve RPC requests on
    #[clap(long, default_value = "127.0.0.1:5242")]
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Enable prometheus metrics on a given address
    #[clap(long = "prometheus")]
    #[serde(rename = "prometheus_bind_addr")]
    pub prom_bind_addr: Option<SocketAddr>,
}

impl Config {
    #[must_use]
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            pools: self.pools.clone(),
            mode: self.mode,
            data_dir: self.data_dir.clone(),
            self_peer: self.self_peer.clone().map(Peer::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfPeer {
    pub public_key: String,
    pub endpoint: String,
    pub route: IpNet,
}

impl FromStr for SelfPeer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ',');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(public_key), Some(endpoint), Some(route)) => Ok(Self {
                public_key: public_key.to_owned(),
                endpoint: endpoint.to_owned(),
                route: route
                    .parse()
                    .map_err(|_| format!("{route:?} is not a CIDR prefix"))?,
            }),
            _ => Err("expected public_key,endpoint,route".to_owned()),
        }
    }
}

impl From<SelfPeer> for Peer {
    fn from(peer: SelfPeer) -> Self {
        Peer {
            public_key: peer.public_key,
            endpoint: peer.endpoint,
            route: peer.route,
            interface_index: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_shape() {
        let config: Config = serde_json::from_str(
            r#"{
                "pools": [{"name": "cluster", "prefix": "10.0.0.0/8"}],
                "mode": "node",
                "data_dir": "/var/lib/wgmesh",
                "self_peer": {"publicKey": "k", "endpoint": "192.0.2.1:51820", "route": "10.0.0.1/32"},
                "prometheus_bind_addr": "127.0.0.1:9100"
            }"#,
        )
        .unwrap();
        assert_eq!(config.listen, default_listen());
        assert_eq!(config.mode, Mode::Node);

        let service = config.service_config();
        assert_eq!(service.pools[0].name, "cluster");
        assert_eq!(service.self_peer.unwrap().public_key, "k");
    }

    #[test]
    fn test_self_peer_flag() {
        let peer: SelfPeer = "k,192.0.2.1:51820,10.0.0.1/32".parse().unwrap();
        assert_eq!(peer.endpoint, "192.0.2.1:51820");
        assert!("k,192.0.2.1:51820".parse::<SelfPeer>().is_err());
    }
}
