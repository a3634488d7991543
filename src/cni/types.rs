//! Result documents exchanged with the container runtime

use std::net::IpAddr;

use ipnet::IpNet;

/// Result versions this plugin can read and write
pub const SUPPORTED_VERSIONS: &[&str] = &["0.3.0", "0.3.1", "0.4.0", "1.0.0"];

/// Version assumed when none can be determined
pub const DEFAULT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Namespace path, for interfaces inside the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IpConfig {
    /// `"4"` or `"6"`. Only present in pre-1.0 results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub address: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    /// Index into [`CniResult::interfaces`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Route {
    pub dst: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<IpAddr>,
}

/// A plugin chain result
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniResult {
    pub cni_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<IpConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    /// Passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<serde_json::Value>,
}

impl CniResult {
    /// Check that every IP config points at an existing interface
    pub fn validate_references(&self) -> Result<(), String> {
        for ip in &self.ips {
            if let Some(index) = ip.interface {
                if index >= self.interfaces.len() {
                    return Err(format!(
                        "IP config {} references interface {} but only {} interfaces exist",
                        ip.address,
                        index,
                        self.interfaces.len()
                    ));
                }
            }
        }
        Ok(())
    }

    /// Put `interface` first and `ip` first, shifting every existing interface reference by one
    pub fn prepend_interface(&mut self, interface: Interface, mut ip: IpConfig) {
        self.interfaces.insert(0, interface);
        for existing in &mut self.ips {
            if let Some(index) = existing.interface.as_mut() {
                *index += 1;
            }
        }
        ip.interface = Some(0);
        self.ips.insert(0, ip);
    }

    /// IP configs attributed to the interface called `name`
    pub fn ips_on<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a IpConfig> + 'a {
        self.ips.iter().filter(move |ip| {
            ip.interface
                .and_then(|index| self.interfaces.get(index))
                .is_some_and(|interface| interface.name == name)
        })
    }

    /// Rewrite the result for output as `version`
    #[must_use]
    pub fn into_version(mut self, version: &str) -> Self {
        let legacy = version.starts_with("0.");
        for ip in &mut self.ips {
            ip.version = legacy.then(|| {
                match ip.address {
                    IpNet::V4(_) => "4",
                    IpNet::V6(_) => "6",
                }
                .to_owned()
            });
        }
        self.cni_version = version.to_owned();
        self
    }
}

/// Error document printed on failure
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResult {
    pub cni_version: String,
    pub code: u32,
    pub msg: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub details: String,
}

/// Answer to the `VERSION` command
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResult {
    pub cni_version: String,
    pub supported_versions: Vec<String>,
}

impl VersionResult {
    #[must_use]
    pub fn new(cni_version: &str) -> Self {
        Self {
            cni_version: cni_version.to_owned(),
            supported_versions: SUPPORTED_VERSIONS.iter().map(|v| (*v).to_owned()).collect(),
        }
    }
}
