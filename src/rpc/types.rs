//! Request and response bodies

use std::net::IpAddr;

use ip_pool::Allocation;
use ipnet::IpNet;

use super::Status;
use crate::registry::Peer;

/// Address family of an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IpVersion {
    #[serde(rename = "IP_VERSION_V4")]
    V4,
    #[serde(rename = "IP_VERSION_V6")]
    V6,
}

impl From<ip_pool::IpVersion> for IpVersion {
    fn from(version: ip_pool::IpVersion) -> Self {
        match version {
            ip_pool::IpVersion::V4 => IpVersion::V4,
            ip_pool::IpVersion::V6 => IpVersion::V6,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocRequest {
    /// Pool to allocate from. The default pool is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpAlloc {
    pub address: String,
    /// Prefix length of the pool, as a decimal string
    pub netmask: String,
    pub version: IpVersion,
}

impl From<Allocation> for IpAlloc {
    fn from(allocation: Allocation) -> Self {
        Self {
            address: allocation.address.to_string(),
            netmask: allocation.prefix_len.to_string(),
            version: allocation.version.into(),
        }
    }
}

impl TryFrom<IpAlloc> for Allocation {
    type Error = String;

    fn try_from(alloc: IpAlloc) -> Result<Self, Self::Error> {
        let address: IpAddr = alloc
            .address
            .parse()
            .map_err(|_| format!("invalid address {:?}", alloc.address))?;
        let prefix_len: u8 = alloc
            .netmask
            .parse()
            .map_err(|_| format!("invalid netmask {:?}", alloc.netmask))?;
        let version = match (address, alloc.version) {
            (IpAddr::V4(_), IpVersion::V4) => ip_pool::IpVersion::V4,
            (IpAddr::V6(_), IpVersion::V6) => ip_pool::IpVersion::V6,
            _ => return Err(format!("address {address} does not match its version")),
        };
        // Reject prefix lengths that are too long for the family
        IpNet::new(address, prefix_len).map_err(|error| error.to_string())?;

        Ok(Allocation {
            address,
            prefix_len,
            version,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocResponse {
    pub alloc: IpAlloc,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReleaseRequest {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReleaseResponse {
    pub released: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterRequest {
    pub public_key: String,
    pub endpoint: String,
    pub route: String,
}

impl TryFrom<RegisterRequest> for Peer {
    type Error = Status;

    fn try_from(request: RegisterRequest) -> Result<Self, Self::Error> {
        if request.public_key.is_empty() {
            return Err(Status::invalid_argument("PublicKey must not be empty"));
        }
        if request.endpoint.is_empty() {
            return Err(Status::invalid_argument("Endpoint must not be empty"));
        }
        let route: IpNet = request
            .route
            .parse()
            .map_err(|_| Status::invalid_argument(format!("Route {:?} is not a CIDR", request.route)))?;

        Ok(Peer {
            public_key: request.public_key,
            endpoint: request.endpoint,
            route,
            interface_index: None,
        })
    }
}

impl From<&Peer> for RegisterRequest {
    fn from(peer: &Peer) -> Self {
        Self {
            public_key: peer.public_key.clone(),
            endpoint: peer.endpoint.clone(),
            route: peer.route.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RegisterResponse {}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnregisterRequest {
    pub public_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UnregisterResponse {}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PeersRequest {}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeersResponse {
    pub peers: Vec<RegisterRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetPeerRequest {
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetPeerResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<RegisterRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_response_shape() {
        let response = AllocResponse {
            alloc: Allocation {
                address: "10.0.0.1".parse().unwrap(),
                prefix_len: 8,
                version: ip_pool::IpVersion::V4,
            }
            .into(),
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({
                "Alloc": {"Address": "10.0.0.1", "Netmask": "8", "Version": "IP_VERSION_V4"}
            })
        );
    }

    #[test]
    fn test_alloc_from_wire_rejects_mismatch() {
        let wire = IpAlloc {
            address: "fd00::1".to_string(),
            netmask: "64".to_string(),
            version: IpVersion::V4,
        };
        assert!(Allocation::try_from(wire).is_err());

        let wire = IpAlloc {
            address: "10.0.0.1".to_string(),
            netmask: "33".to_string(),
            version: IpVersion::V4,
        };
        assert!(Allocation::try_from(wire).is_err());
    }

    #[test]
    fn test_register_validation() {
        let valid = RegisterRequest {
            public_key: "key".to_string(),
            endpoint: "192.0.2.1:51820".to_string(),
            route: "10.0.0.1/32".to_string(),
        };
        assert!(Peer::try_from(valid.clone()).is_ok());

        for invalid in [
            RegisterRequest {
                public_key: String::new(),
                ..valid.clone()
            },
            RegisterRequest {
                endpoint: String::new(),
                ..valid.clone()
            },
            RegisterRequest {
                route: "not-a-route".to_string(),
                ..valid.clone()
            },
        ] {
            let status = Peer::try_from(invalid).unwrap_err();
            assert_eq!(status.code, super::super::Code::InvalidArgument);
        }
    }

    #[test]
    fn test_empty_alloc_request() {
        let request: AllocRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request.pool, None);
    }
}
