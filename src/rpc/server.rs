use std::{convert::Infallible, future::Future, net::SocketAddr, sync::Arc};

use hyper::{
    header::{HeaderValue, CONTENT_TYPE},
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use wgmesh_metrics::metrics::label_values;

use super::{
    types::{
        AllocRequest, AllocResponse, GetPeerRequest, GetPeerResponse, PeersRequest,
        PeersResponse, RegisterRequest, RegisterResponse, ReleaseRequest, ReleaseResponse,
        UnregisterRequest, UnregisterResponse,
    },
    Code, Status, ALLOC_PATH, GET_PEER_PATH, PEERS_PATH, REGISTER_PATH, RELEASE_PATH,
    UNREGISTER_PATH,
};
use crate::{registry::Peer, service::MeshService};

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, Status> {
    // An empty body is an empty message
    let body = if body.is_empty() { b"{}".as_slice() } else { body };
    serde_json::from_slice(body)
        .map_err(|error| Status::invalid_argument(format!("Malformed request: {error}")))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Status> {
    serde_json::to_vec(value).map_err(|error| Status::new(Code::Internal, error.to_string()))
}

fn alloc(service: &MeshService, body: &[u8]) -> Result<Vec<u8>, Status> {
    let request: AllocRequest = decode(body)?;
    let allocation = service.allocate(request.pool.as_deref())?;
    encode(&AllocResponse {
        alloc: allocation.into(),
    })
}

fn release(service: &MeshService, body: &[u8]) -> Result<Vec<u8>, Status> {
    let request: ReleaseRequest = decode(body)?;
    let address = request.address.parse().map_err(|_| {
        Status::invalid_argument(format!("{:?} is not an IP address", request.address))
    })?;
    encode(&ReleaseResponse {
        released: service.release_address(address),
    })
}

fn register(service: &MeshService, body: &[u8]) -> Result<Vec<u8>, Status> {
    let request: RegisterRequest = decode(body)?;
    service.register_peer(Peer::try_from(request)?)?;
    encode(&RegisterResponse {})
}

fn unregister(service: &MeshService, body: &[u8]) -> Result<Vec<u8>, Status> {
    let request: UnregisterRequest = decode(body)?;
    service.unregister_peer(&request.public_key);
    encode(&UnregisterResponse {})
}

fn peers(service: &MeshService, body: &[u8]) -> Result<Vec<u8>, Status> {
    let PeersRequest {} = decode(body)?;
    encode(&PeersResponse {
        peers: service.list_peers().iter().map(RegisterRequest::from).collect(),
    })
}

fn get_peer(service: &MeshService, body: &[u8]) -> Result<Vec<u8>, Status> {
    let request: GetPeerRequest = decode(body)?;
    encode(&GetPeerResponse {
        peer: service
            .lookup_peer(&request.public_key)
            .as_ref()
            .map(RegisterRequest::from),
    })
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Handle one RPC request
pub async fn handle_request(
    service: Arc<MeshService>,
    request: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if request.method() != Method::POST {
        let mut response = Response::new(Body::from("Method not allowed"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let path = request.uri().path().to_owned();
    let body = match hyper::body::to_bytes(request.into_body()).await {
        Ok(body) => body,
        Err(error) => {
            log::warn!("Failed to read request body for {}: {}", path, error);
            let mut response = Response::new(Body::from("Failed to read request body"));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let (method, result) = match path.as_str() {
        ALLOC_PATH => (label_values::METHOD_ALLOC, alloc(&service, &body)),
        RELEASE_PATH => (label_values::METHOD_RELEASE, release(&service, &body)),
        REGISTER_PATH => (label_values::METHOD_REGISTER, register(&service, &body)),
        UNREGISTER_PATH => (label_values::METHOD_UNREGISTER, unregister(&service, &body)),
        PEERS_PATH => (label_values::METHOD_PEERS, peers(&service, &body)),
        GET_PEER_PATH => (label_values::METHOD_GET_PEER, get_peer(&service, &body)),
        _ => (
            label_values::METHOD_UNKNOWN,
            Err(Status::new(
                Code::Unimplemented,
                format!("Unknown method {path}"),
            )),
        ),
    };

    let status = if result.is_ok() {
        label_values::STATUS_OK
    } else {
        label_values::STATUS_ERROR
    };
    service
        .metrics()
        .rpc_requests
        .with_label_values(&[method, status])
        .inc();

    Ok(match result {
        Ok(body) => {
            log::trace!("{} succeeded", path);
            json_response(StatusCode::OK, body)
        }
        Err(status) => {
            log::debug!("{} failed: {}", path, status);
            let body = serde_json::to_vec(&status).unwrap_or_default();
            json_response(status.code.http_status(), body)
        }
    })
}

/// Bind the RPC server without starting it.
///
/// Returns the bound address and the server future, which completes once `shutdown` resolves.
pub fn bind<S>(
    bind_addr: SocketAddr,
    service: Arc<MeshService>,
    shutdown: S,
) -> Result<(SocketAddr, impl Future<Output = Result<(), hyper::Error>>), hyper::Error>
where
    S: Future<Output = ()>,
{
    let make_service = make_service_fn(move |_| {
        let service = Arc::clone(&service);
        async move {
            Ok::<_, Infallible>(service_fn(move |request| {
                handle_request(Arc::clone(&service), request)
            }))
        }
    });
    let server = Server::try_bind(&bind_addr)?.serve(make_service);
    let local_addr = server.local_addr();
    Ok((local_addr, server.with_graceful_shutdown(shutdown)))
}
