//! # Controller
//!
//! Turns exposed Services and their ready Pods into Envoy snapshots.
//!
//! - `backoff`: exponential retry delay for failed syncs
//! - `lister`: read access to Services and Pods (reflector stores in production)
//! - `pods`: ready Pod selection and target port resolution
//! - `sync`: one sync cycle, publishing a snapshot when the configuration changed

pub mod backoff;
pub mod lister;
pub mod pods;
pub mod sync;

pub use lister::{ResourceLister, StoreLister};
pub use sync::{SyncOptions, SyncOutcome, Synchronizer};

use crate::xds::XdsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to list {kind}: {reason}")]
    ListFailed { kind: &'static str, reason: String },

    #[error("service {service} is exposed but has unsupported type {service_type:?}, only NodePort is supported")]
    UnsupportedServiceType {
        service: String,
        service_type: Option<String>,
    },

    #[error(transparent)]
    Xds(#[from] XdsError),
}
