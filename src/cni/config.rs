//! Network configuration read from stdin

use std::time::Duration;

use super::{
    types::{CniResult, SUPPORTED_VERSIONS},
    Error,
};

/// Longest interface name the kernel accepts
const MAX_INTERFACE_NAME: usize = 15;

/// Where the WireGuard interface gets its address from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AddressSource {
    /// Ask the node manager for a fresh address
    #[default]
    Allocator,
    /// Reuse the first address of the previous result
    PrevResult,
}

/// This node's identity in the mesh
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerConf {
    pub public_key: String,
    pub endpoint: String,
}

/// Per-container overrides
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(tag = "version")]
pub enum WireguardOverride {
    #[serde(rename = "v1")]
    V1(WireguardOverrideV1),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireguardOverrideV1 {
    pub public_key: Option<String>,
    pub endpoint: Option<String>,
    pub pool: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct RuntimeConfig {
    pub wireguard: Option<WireguardOverride>,
}

fn default_node_manager_addr() -> String {
    "http://127.0.0.1:5242".to_owned()
}

fn default_interface_name() -> String {
    "wg0".to_owned()
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_readiness_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConf {
    pub cni_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub plugin_type: String,
    pub prev_result: Option<CniResult>,

    #[serde(default = "default_node_manager_addr")]
    pub node_manager_addr: String,
    #[serde(default = "default_interface_name")]
    pub interface_name: String,
    pub pool: Option<String>,
    #[serde(default)]
    pub address_source: AddressSource,
    pub mtu: Option<u32>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,
    pub peer: Option<PeerConf>,
    #[serde(default)]
    pub runtime_config: RuntimeConfig,
}

impl PluginConf {
    /// Parse and validate the configuration document
    pub fn parse(stdin: &[u8]) -> Result<Self, Error> {
        let conf: Self = serde_json::from_slice(stdin)
            .map_err(|error| Error::Config(format!("Failed to parse network configuration: {error}")))?;
        conf.validate()?;
        Ok(conf)
    }

    fn validate(&self) -> Result<(), Error> {
        if !SUPPORTED_VERSIONS.contains(&self.cni_version.as_str()) {
            return Err(Error::IncompatibleVersion(self.cni_version.clone()));
        }
        if self.interface_name.is_empty() || self.interface_name.len() > MAX_INTERFACE_NAME {
            return Err(Error::Config(format!(
                "interfaceName {:?} must be between 1 and {} characters",
                self.interface_name, MAX_INTERFACE_NAME
            )));
        }
        if self.node_manager_addr.is_empty() {
            return Err(Error::Config("nodeManagerAddr must not be empty".to_owned()));
        }
        if self.timeout_seconds == 0 {
            return Err(Error::Config("timeoutSeconds must be positive".to_owned()));
        }
        if self.mtu == Some(0) {
            return Err(Error::Config("mtu must be positive".to_owned()));
        }
        if let Some(peer) = self.peer() {
            if peer.public_key.is_empty() || peer.endpoint.is_empty() {
                return Err(Error::Config(
                    "peer needs both a publicKey and an endpoint".to_owned(),
                ));
            }
        }
        Ok(())
    }

    fn wireguard_override(&self) -> Option<&WireguardOverrideV1> {
        match &self.runtime_config.wireguard {
            Some(WireguardOverride::V1(values)) => Some(values),
            None => None,
        }
    }

    /// The peer identity to register, after applying runtime overrides
    #[must_use]
    pub fn peer(&self) -> Option<PeerConf> {
        let overrides = self.wireguard_override();
        let public_key = overrides
            .and_then(|values| values.public_key.clone())
            .or_else(|| self.peer.as_ref().map(|peer| peer.public_key.clone()))?;
        let endpoint = overrides
            .and_then(|values| values.endpoint.clone())
            .or_else(|| self.peer.as_ref().map(|peer| peer.endpoint.clone()))
            .unwrap_or_default();
        Some(PeerConf {
            public_key,
            endpoint,
        })
    }

    /// Pool to allocate from, after applying runtime overrides
    #[must_use]
    pub fn pool(&self) -> Option<&str> {
        self.wireguard_override()
            .and_then(|values| values.pool.as_deref())
            .or(self.pool.as_deref())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    #[must_use]
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }
}

/// Best-effort read of `cniVersion`, for reporting errors in the caller's version
#[must_use]
pub fn probe_version(stdin: &[u8]) -> Option<String> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Probe {
        cni_version: String,
    }
    serde_json::from_slice::<Probe>(stdin)
        .ok()
        .map(|probe| probe.cni_version)
}
