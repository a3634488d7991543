use std::{net::IpAddr, time::Duration};

use hyper::{client::HttpConnector, header::CONTENT_TYPE, Body, Client, Request, Uri};
use ip_pool::Allocation;
use serde::{de::DeserializeOwned, Serialize};

use super::{
    types::{
        AllocRequest, AllocResponse, GetPeerRequest, GetPeerResponse, PeersRequest,
        PeersResponse, RegisterRequest, RegisterResponse, ReleaseRequest, ReleaseResponse,
        UnregisterRequest, UnregisterResponse,
    },
    Error, NodeManager, Status, ALLOC_PATH, GET_PEER_PATH, PEERS_PATH, REGISTER_PATH,
    RELEASE_PATH, UNREGISTER_PATH,
};
use crate::registry::Peer;

/// Talks to a node manager over HTTP
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: Client<HttpConnector>,
    base: String,
    timeout: Duration,
}

impl RpcClient {
    /// Construct a client for the node manager at `address`, e.g. `http://127.0.0.1:5242`.
    ///
    /// Each call gives up after `timeout`.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, Error> {
        address
            .parse::<Uri>()
            .map_err(|error| Error::InvalidAddress(address.to_owned(), error))?;
        Ok(Self {
            client: Client::new(),
            base: address.trim_end_matches('/').to_owned(),
            timeout,
        })
    }

    async fn call<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp, Error>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base, path);
        let uri: Uri = url
            .parse()
            .map_err(|error| Error::InvalidAddress(url.clone(), error))?;
        let request = Request::post(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(request)?))?;

        log::trace!("Calling {}", url);
        let (status, body) = tokio::time::timeout(self.timeout, async {
            let response = self.client.request(request).await?;
            let status = response.status();
            let body = hyper::body::to_bytes(response.into_body()).await?;
            Ok::<_, hyper::Error>((status, body))
        })
        .await
        .map_err(|_| Error::DeadlineExceeded)??;

        if status.is_success() {
            return Ok(serde_json::from_slice(&body)?);
        }
        match serde_json::from_slice::<Status>(&body) {
            Ok(status) => Err(status.into()),
            Err(_) => Err(Error::InvalidResponse(format!(
                "{url} answered with HTTP {status}"
            ))),
        }
    }
}

impl NodeManager for RpcClient {
    async fn alloc(&self, pool: Option<&str>) -> Result<Allocation, Error> {
        let response: AllocResponse = self
            .call(
                ALLOC_PATH,
                &AllocRequest {
                    pool: pool.map(str::to_owned),
                },
            )
            .await?;
        Allocation::try_from(response.alloc).map_err(Error::InvalidResponse)
    }

    async fn release(&self, address: IpAddr) -> Result<bool, Error> {
        let response: ReleaseResponse = self
            .call(
                RELEASE_PATH,
                &ReleaseRequest {
                    address: address.to_string(),
                },
            )
            .await?;
        Ok(response.released)
    }

    async fn register(&self, peer: Peer) -> Result<(), Error> {
        let RegisterResponse {} = self
            .call(REGISTER_PATH, &RegisterRequest::from(&peer))
            .await?;
        Ok(())
    }

    async fn unregister(&self, public_key: &str) -> Result<(), Error> {
        let UnregisterResponse {} = self
            .call(
                UNREGISTER_PATH,
                &UnregisterRequest {
                    public_key: public_key.to_owned(),
                },
            )
            .await?;
        Ok(())
    }

    async fn get_peer(&self, public_key: &str) -> Result<Option<Peer>, Error> {
        let response: GetPeerResponse = self
            .call(
                GET_PEER_PATH,
                &GetPeerRequest {
                    public_key: public_key.to_owned(),
                },
            )
            .await?;
        response
            .peer
            .map(|peer| Peer::try_from(peer).map_err(|status| Error::InvalidResponse(status.message)))
            .transpose()
    }

    async fn peers(&self) -> Result<Vec<Peer>, Error> {
        let response: PeersResponse = self.call(PEERS_PATH, &PeersRequest {}).await?;
        response
            .peers
            .into_iter()
            .map(|peer| Peer::try_from(peer).map_err(|status| Error::InvalidResponse(status.message)))
            .collect()
    }
}
