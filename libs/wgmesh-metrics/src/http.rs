use std::{convert::Infallible, net::SocketAddr};

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use prometheus::{Encoder, Registry, TextEncoder};

/// Handle an HTTP request
async fn handle_request(
    registry: Registry,
    request: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    // If the request is targeting the metrics endpoint
    if request.method() == Method::GET && request.uri().path() == "/metrics" {
        // Gather metrics
        let metric_families = registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(error) = encoder.encode(&metric_families, &mut buffer) {
            log::error!("Failed to encode metrics: {}", error);
            let mut response = Response::new(Body::from("Failed to encode metrics"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return Ok(response);
        }

        // Return the response
        return Ok(Response::new(Body::from(buffer)));
    }

    // Otherwise, just return a 404
    let mut response = Response::new(Body::from("Not found"));
    *response.status_mut() = StatusCode::NOT_FOUND;
    Ok(response)
}

/// Bring up an HTTP server that listens for metrics requests
pub async fn serve_metrics(bind_addr: SocketAddr, registry: Registry) {
    // Set up the server
    let make_service = make_service_fn(move |_| {
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |request| {
                handle_request(registry.clone(), request)
            }))
        }
    });
    let server = Server::bind(&bind_addr).serve(make_service);
    log::info!("Serving metrics on http://{}/metrics", bind_addr);

    // Run the server
    if let Err(e) = server.await {
        log::error!("Metrics server error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Metrics;

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let metrics = Metrics::new().unwrap();
        metrics
            .rpc_requests
            .with_label_values(&[
                crate::metrics::label_values::METHOD_REGISTER,
                crate::metrics::label_values::STATUS_OK,
            ])
            .inc();

        let request = Request::get("/metrics").body(Body::empty()).unwrap();
        let response = handle_request(metrics.registry().clone(), request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("wgmesh_rpc_requests{method=\"register\",status=\"ok\"} 1"));
    }

    #[tokio::test]
    async fn test_other_paths_are_not_found() {
        let request = Request::get("/").body(Body::empty()).unwrap();
        let response = handle_request(Registry::new(), request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
