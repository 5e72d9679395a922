//! # CLI
//!
//! Command line flags of the envoy manager.
//!
//! Flags are accepted in the single-dash form used by existing deployments
//! (`-listen-address=:8001`) as well as the usual `--listen-address`.

use crate::constants::{
    DEFAULT_ENVOY_ADMIN_PORT, DEFAULT_ENVOY_NODE_NAME, DEFAULT_ENVOY_STATS_PORT,
    DEFAULT_EXPOSE_ANNOTATION_KEY, DEFAULT_LISTEN_ADDRESS, DEFAULT_METRICS_PORT,
};
use crate::controller::SyncOptions;
use crate::xds::EnvoyPorts;
use anyhow::{Context, Result};
use clap::Parser;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "envoy-manager",
    about = "Envoy xDS control plane exposing annotated NodePort services",
    version
)]
pub struct Cli {
    /// Enable more verbose logging
    #[arg(long)]
    pub debug: bool,

    /// Address to serve the xDS gRPC API on
    #[arg(long, default_value = DEFAULT_LISTEN_ADDRESS)]
    pub listen_address: String,

    /// Node id Envoy instances are served under
    #[arg(long, default_value = DEFAULT_ENVOY_NODE_NAME)]
    pub envoy_node_name: String,

    /// Envoy admin port
    #[arg(long, default_value_t = DEFAULT_ENVOY_ADMIN_PORT)]
    pub envoy_admin_port: u16,

    /// Envoy port exposing /healthz and /stats
    #[arg(long, default_value_t = DEFAULT_ENVOY_STATS_PORT)]
    pub envoy_stats_port: u16,

    /// Annotation a Service must set to "true" to be exposed
    #[arg(long, default_value = DEFAULT_EXPOSE_ANNOTATION_KEY)]
    pub expose_annotation_key: String,

    /// Only watch Services and Pods in this namespace (default: all namespaces)
    #[arg(long)]
    pub namespace: Option<String>,

    /// Port of the metrics and probes HTTP server
    #[arg(long, env = "METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,
}

impl Cli {
    /// Parse the process arguments, accepting single-dash long flags
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_go_style_flags(std::env::args_os()))
    }

    /// Socket address of the xDS server
    ///
    /// # Errors
    ///
    /// Fails if `listen_address` is neither `host:port` nor `:port`.
    pub fn xds_address(&self) -> Result<SocketAddr> {
        parse_listen_address(&self.listen_address)
    }

    pub fn envoy_ports(&self) -> EnvoyPorts {
        EnvoyPorts {
            admin: u32::from(self.envoy_admin_port),
            stats: u32::from(self.envoy_stats_port),
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            node_id: self.envoy_node_name.clone(),
            expose_annotation_key: self.expose_annotation_key.clone(),
            envoy_ports: self.envoy_ports(),
        }
    }
}

/// Rewrite `-flag` and `-flag=value` into their `--` form.
///
/// Single-character short flags (`-h`, `-V`) are left alone.
pub fn normalize_go_style_flags<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator,
    I::Item: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .enumerate()
        .map(|(i, arg)| {
            if i == 0 {
                return arg;
            }
            match arg.to_str() {
                Some(s) if s.starts_with('-') && !s.starts_with("--") => {
                    let flag = s[1..].split('=').next().unwrap_or_default();
                    if flag.len() > 1 {
                        OsString::from(format!("-{s}"))
                    } else {
                        arg
                    }
                }
                _ => arg,
            }
        })
        .collect()
}

/// Parse `host:port` or Go's `:port` shorthand (all interfaces).
pub fn parse_listen_address(address: &str) -> Result<SocketAddr> {
    if let Some(port) = address.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid port in listen address {address:?}"))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    address
        .parse()
        .with_context(|| format!("invalid listen address {address:?}"))
}
