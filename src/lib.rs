//! NodePort Proxy Library
//!
//! This library provides the envoy manager of the NodePort proxy: it watches
//! Services annotated for exposure together with their ready Pods, turns them
//! into an Envoy configuration snapshot and serves that snapshot over the
//! xDS gRPC API.
//!
//! ## Quick Start
//!
//! ```rust
//! use nodeport_proxy::xds::{EnvoyPorts, SnapshotBuilder};
//!
//! let snapshot = SnapshotBuilder::new(EnvoyPorts { admin: 9001, stats: 8002 }).build("1.0.0");
//! assert_eq!(snapshot.version(), "1.0.0");
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod runtime;
pub mod server;
pub mod xds;
