use std::{collections::HashSet, os::unix::fs::DirBuilderExt, path::PathBuf};

use ipnet::IpNet;

use super::{persist_path, Error};
use crate::registry::Peer;

/// Role of this service instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Authoritative cluster-wide allocator and registry
    #[default]
    Cluster,
    /// Per-node instance that announces its own peer
    Node,
}

/// A named address pool
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct PoolConfig {
    pub name: String,
    pub prefix: IpNet,
}

impl std::str::FromStr for PoolConfig {
    type Err = String;

    /// Parse `name=prefix`, or a bare prefix named after itself
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, prefix) = match s.split_once('=') {
            Some((name, prefix)) => (name.to_owned(), prefix),
            None => (s.to_owned(), s),
        };
        Ok(Self {
            name,
            prefix: prefix
                .parse()
                .map_err(|_| format!("{prefix:?} is not a CIDR prefix"))?,
        })
    }
}

/// Everything [`super::MeshService::new`] needs
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address pools. The first one is the default
    pub pools: Vec<PoolConfig>,
    pub mode: Mode,
    /// Directory holding the persistence file, if persistence is wanted
    pub data_dir: Option<PathBuf>,
    /// This node's own peer descriptor
    pub self_peer: Option<Peer>,
}

impl ServiceConfig {
    /// Check the config for mistakes the allocator and registry cannot catch
    pub fn validate(&self) -> Result<(), Error> {
        if self.pools.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one address pool must be configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for pool in &self.pools {
            if pool.name.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "Pool {} has an empty name",
                    pool.prefix
                )));
            }
            if !names.insert(pool.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "Pool name {} is used more than once",
                    pool.name
                )));
            }
        }

        match (&self.self_peer, self.mode) {
            (None, Mode::Node) => Err(Error::InvalidConfig(
                "Node mode requires a self peer".to_string(),
            )),
            (Some(peer), _) if peer.public_key.is_empty() || peer.endpoint.is_empty() => Err(
                Error::InvalidConfig("Self peer needs a public key and an endpoint".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Path of the persistence file, creating its directory if needed
    pub fn persist_file(&self) -> Result<Option<PathBuf>, Error> {
        let Some(data_dir) = &self.data_dir else {
            return Ok(None);
        };

        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(data_dir)
            .map_err(|error| Error::DataDir(data_dir.clone(), error))?;

        Ok(Some(persist_path(data_dir, self.mode)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pools(names: &[&str]) -> Vec<PoolConfig> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| PoolConfig {
                name: (*name).to_string(),
                prefix: format!("10.{i}.0.0/16").parse().unwrap(),
            })
            .collect()
    }

    #[test]
    fn test_validate() {
        let mut config = ServiceConfig {
            pools: pools(&["a", "b"]),
            mode: Mode::Cluster,
            data_dir: None,
            self_peer: None,
        };
        assert!(config.validate().is_ok());

        config.pools = pools(&["a", "a"]);
        assert!(config.validate().is_err());

        config.pools = Vec::new();
        assert!(config.validate().is_err());

        config.pools = pools(&["a"]);
        config.mode = Mode::Node;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_from_str() {
        let pool: PoolConfig = "cluster=10.0.0.0/8".parse().unwrap();
        assert_eq!(pool.name, "cluster");
        assert_eq!(pool.prefix, "10.0.0.0/8".parse::<IpNet>().unwrap());

        let pool: PoolConfig = "fd00::/64".parse().unwrap();
        assert_eq!(pool.name, "fd00::/64");

        assert!("cluster=banana".parse::<PoolConfig>().is_err());
    }

    #[test]
    fn test_persist_file_per_mode() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("state");
        let mut config = ServiceConfig {
            pools: pools(&["a"]),
            mode: Mode::Cluster,
            data_dir: Some(data_dir.clone()),
            self_peer: None,
        };
        assert_eq!(
            config.persist_file().unwrap(),
            Some(data_dir.join("cluster-wireguard.json"))
        );
        assert!(data_dir.is_dir());

        config.mode = Mode::Node;
        assert_eq!(
            config.persist_file().unwrap(),
            Some(data_dir.join("node-wireguard.json"))
        );
    }

    #[test]
    fn test_mode_from_json() {
        let mode: Mode = serde_json::from_str("\"node\"").unwrap();
        assert_eq!(mode, Mode::Node);
    }
}
