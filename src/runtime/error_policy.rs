//! # Error Policy
//!
//! Error handling and backoff logic for the watch loop.
//! This module handles failed sync cycles and watch stream errors.

use crate::controller::backoff::ExponentialBackoff;
use crate::controller::{ResourceLister, SyncError};
use crate::observability::metrics;
use crate::runtime::watch_loop::SyncContext;
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Controller error policy: requeue the key after the next backoff delay.
pub fn error_policy<L: ResourceLister>(
    _namespace: Arc<Namespace>,
    error: &SyncError,
    ctx: Arc<SyncContext<L>>,
) -> Action {
    Action::requeue(ctx.with_backoff(|backoff| handle_sync_error(error, backoff)))
}

/// Handle a failed sync cycle and return how long to wait before retrying.
///
/// Consecutive failures grow the delay exponentially; the caller resets the
/// backoff after the next successful sync.
pub fn handle_sync_error(error: &SyncError, backoff: &mut ExponentialBackoff) -> Duration {
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.sync_error",
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Sync failed: {}", error);
    metrics::increment_sync_errors();

    let delay = backoff.next_backoff();
    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

    info!(
        "Retrying sync with exponential backoff: {}ms (failures: {}, trigger source: error-backoff)",
        delay.as_millis(),
        backoff.failures()
    );
    info!(
        "Next retry scheduled: {} (trigger source: error-backoff)",
        next_trigger_time.to_rfc3339()
    );

    metrics::increment_requeues_total("error-backoff");
    delay
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// Resource version too old, the watcher relists
    Expired,
    /// RBAC revoked or token expired
    Unauthorized,
    /// API server asked us to slow down
    Throttled,
    Other,
}

pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error_string.contains("401")
        || error_string.contains("403")
        || error_string.contains("Unauthorized")
        || error_string.contains("Forbidden")
    {
        WatchErrorKind::Unauthorized
    } else if error_string.contains("429") || error_string.contains("TooManyRequests") {
        WatchErrorKind::Throttled
    } else {
        WatchErrorKind::Other
    }
}

/// Log a watch stream error.
///
/// The watchers restart themselves with their own backoff, so nothing is
/// retried here.
pub fn handle_watch_error(kind: &str, error_string: &str) -> WatchErrorKind {
    let class = classify_watch_error(error_string);
    match class {
        WatchErrorKind::Expired => {
            warn!(
                resource = kind,
                "Watch resource version expired (410), watch will relist"
            );
        }
        WatchErrorKind::Unauthorized => {
            error!(
                resource = kind,
                "Watch not authorized - RBAC may have been revoked or token expired: {}",
                error_string
            );
            error!("The envoy manager needs get, list and watch on services and pods");
            error!(
                "      kubectl auth can-i watch {} --as=system:serviceaccount:<namespace>:<serviceaccount>",
                kind
            );
        }
        WatchErrorKind::Throttled => {
            warn!(
                resource = kind,
                "API server throttling watch (429), backing off: {}", error_string
            );
        }
        WatchErrorKind::Other => {
            warn!(resource = kind, "Watch stream error: {}", error_string);
        }
    }
    class
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_sync_error_grows_delay() {
        let mut backoff = ExponentialBackoff::new(5, 1_000);
        let error = SyncError::UnsupportedServiceType {
            service: "ns/svc".to_string(),
            service_type: Some("ClusterIP".to_string()),
        };

        assert_eq!(handle_sync_error(&error, &mut backoff), Duration::from_millis(5));
        assert_eq!(handle_sync_error(&error, &mut backoff), Duration::from_millis(10));
        assert_eq!(backoff.failures(), 2);
    }

    #[test]
    fn test_classify_watch_error() {
        assert_eq!(
            classify_watch_error("ErrorResponse { code: 410, reason: \"Expired\" }"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            classify_watch_error("ErrorResponse { code: 403, reason: \"Forbidden\" }"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            classify_watch_error("ErrorResponse { code: 429 }"),
            WatchErrorKind::Throttled
        );
        assert_eq!(
            classify_watch_error("connection reset by peer"),
            WatchErrorKind::Other
        );
    }
}
