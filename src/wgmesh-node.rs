//! Entrypoint for the `wgmesh-node` binary.
//!
//! This binary owns the address pools and the peer registry, and serves both to
//! the container network plugin over RPC.

use std::sync::Arc;

use args::node::Args;
use clap::Parser;
use common::logging::{enable_logger, Target};
use wgmesh::{rpc, service::MeshService};
use wgmesh_metrics::Metrics;

mod args;
mod common;
mod profiler;

#[tokio::main]
pub async fn main() {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    if let Err(error) = enable_logger(args.verbose, Target::Stdout) {
        eprintln!("Failed to initialize logging: {error}");
    }

    // Parse the config
    let config = match args.data() {
        Ok(config) => config,
        Err(error) => {
            log::error!("{}", error);
            std::process::exit(1);
        }
    };

    // Start the profiler if requested
    let _puffin = profiler::start_puffin_server(&args.profiler_args);

    let metrics = match Metrics::new() {
        Ok(metrics) => metrics,
        Err(error) => {
            log::error!("Failed to set up metrics: {}", error);
            std::process::exit(1);
        }
    };

    // Build the service, loading any persisted peers
    let (service, writer) = match MeshService::new(config.service_config(), metrics) {
        Ok(built) => built,
        Err(error) => {
            log::error!("{}", error);
            std::process::exit(1);
        }
    };
    let service = Arc::new(service);
    let writer = writer.map(|writer| tokio::spawn(writer.run()));
    log::info!(
        "Tracking {} known peers in {:?} mode",
        service.registry().len(),
        service.mode()
    );

    // Serve metrics if requested
    if let Some(bind_addr) = config.prom_bind_addr {
        tokio::spawn(wgmesh_metrics::http::serve_metrics(
            bind_addr,
            service.metrics().registry().clone(),
        ));
    }

    let shutdown = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for shutdown signal: {}", error);
            std::future::pending::<()>().await;
        }
        log::info!("Shutting down");
    };
    let (address, server) = match rpc::server::bind(config.listen, Arc::clone(&service), shutdown)
    {
        Ok(bound) => bound,
        Err(error) => {
            log::error!("Failed to bind {}: {}", config.listen, error);
            std::process::exit(1);
        }
    };
    log::info!("Serving RPC on http://{}", address);

    if let Err(error) = server.await {
        log::error!("RPC server error: {}", error);
    }

    // The writer exits after a final flush once the last registry handle is gone
    drop(service);
    if let Some(writer) = writer {
        if let Err(error) = writer.await {
            log::error!("Peer registry writer failed: {}", error);
        }
    }
}
