//! # Initialization
//!
//! Startup of the envoy manager: rustls setup, tracing, metrics and the
//! Kubernetes client.

use crate::cli::Cli;
use crate::config::ControllerConfig;
use crate::observability::{logging, metrics};
use crate::server::ServerState;
use crate::xds::SnapshotCache;
use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use tracing::{debug, info};

/// Components shared by the watch loop and the servers
pub struct InitializationResult {
    pub client: Client,
    pub config: ControllerConfig,
    pub cache: Arc<SnapshotCache>,
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("config", &self.config)
            .field(
                "server_ready",
                &self
                    .server_state
                    .is_ready
                    .load(std::sync::atomic::Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

/// Initialize the runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - Kubernetes client creation
pub async fn initialize(cli: &Cli) -> Result<InitializationResult> {
    // Configure rustls crypto provider FIRST, before anything opens a TLS connection
    // Fails only if a provider is already installed, which is fine
    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    let config = ControllerConfig::from_env();
    logging::init_tracing(cli.debug, config.log_format)?;

    info!("Starting NodePort Proxy Envoy Manager");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    if !provider_installed {
        debug!("rustls crypto provider was already installed");
    }
    info!(
        listen_address = cli.listen_address.as_str(),
        node = cli.envoy_node_name.as_str(),
        admin_port = cli.envoy_admin_port,
        stats_port = cli.envoy_stats_port,
        expose_annotation_key = cli.expose_annotation_key.as_str(),
        namespace = cli.namespace.as_deref().unwrap_or("<all>"),
        "Configuration loaded"
    );

    metrics::register_metrics()?;

    let cache = Arc::new(SnapshotCache::new());
    let server_state = Arc::new(ServerState::new(Arc::clone(&cache), &cli.envoy_node_name));

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig or in-cluster config is available.")?;

    Ok(InitializationResult {
        client,
        config,
        cache,
        server_state,
    })
}
