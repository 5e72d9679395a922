//! NodePort Proxy Envoy Manager
//!
//! Serves the Envoy configuration of the NodePort proxy over xDS.
//!
//! ## Architecture
//!
//! - Watches Services and Pods (all namespaces or a single one)
//! - Builds a snapshot for every Service annotated for exposure
//! - Publishes the snapshot to the xDS server Envoy connects to
//! - Serves metrics and probes over HTTP

use anyhow::{Context, Result};
use nodeport_proxy::cli::Cli;
use nodeport_proxy::runtime::initialization::initialize;
use nodeport_proxy::runtime::shutdown::{install_signal_handler, shutdown_requested};
use nodeport_proxy::runtime::watch_loop::run_watch_loop;
use nodeport_proxy::server::start_server;
use nodeport_proxy::xds::XdsServer;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    let init = initialize(&cli).await?;

    let xds_address = cli.xds_address()?;
    let shutdown = install_signal_handler(Arc::clone(&init.server_state));

    // HTTP server for metrics and probes
    let server_port = cli.metrics_port;
    let http_state = Arc::clone(&init.server_state);
    let http_shutdown = shutdown_requested(shutdown.clone());
    let http_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, http_state, http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // xDS gRPC server Envoy connects to
    let xds = XdsServer::new(Arc::clone(&init.cache), &cli.envoy_node_name);
    let xds_shutdown = shutdown_requested(shutdown);
    let xds_handle = tokio::spawn(async move {
        info!("xDS server listening on {}", xds_address);
        if let Err(e) = xds
            .into_router()
            .serve_with_shutdown(xds_address, xds_shutdown)
            .await
        {
            error!("xDS server error: {}", e);
        }
    });

    let watch_result = run_watch_loop(
        init.client,
        cli.namespace.clone(),
        cli.sync_options(),
        init.cache,
        init.config,
        Arc::clone(&init.server_state),
    )
    .await;

    init.server_state.set_ready(false);
    if watch_result.is_err() {
        // Servers only stop on their own once a signal arrived
        http_handle.abort();
        xds_handle.abort();
    }
    let _ = http_handle.await;
    let _ = xds_handle.await;

    watch_result.context("Watch loop failed")?;
    info!("Envoy manager stopped gracefully");
    Ok(())
}
