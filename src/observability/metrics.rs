//! # Metrics
//!
//! Prometheus metrics for monitoring the envoy manager.
//!
//! ## Metrics Exposed
//!
//! - `nodeport_proxy_syncs_total` - Total number of sync cycles
//! - `nodeport_proxy_sync_errors_total` - Total number of failed sync cycles
//! - `nodeport_proxy_sync_duration_seconds` - Duration of sync cycles
//! - `nodeport_proxy_snapshots_published_total` - Total number of snapshots published
//! - `nodeport_proxy_snapshot_version` - Major version of the last published snapshot
//! - `nodeport_proxy_exposed_services` - Services exposed by the last published snapshot
//! - `nodeport_proxy_sync_requeues_total` - Sync retries scheduled, by reason
//! - `nodeport_proxy_xds_streams_active` - Currently open xDS streams
//! - `nodeport_proxy_xds_responses_total` - Discovery responses sent, by type URL
//! - `nodeport_proxy_xds_nacks_total` - Configurations rejected by Envoy, by type URL

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static SYNCS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("nodeport_proxy_syncs_total", "Total number of sync cycles")
        .expect("Failed to create SYNCS_TOTAL metric - this should never happen")
});

static SYNC_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "nodeport_proxy_sync_errors_total",
        "Total number of failed sync cycles",
    )
    .expect("Failed to create SYNC_ERRORS_TOTAL metric - this should never happen")
});

static SYNC_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "nodeport_proxy_sync_duration_seconds",
            "Duration of sync cycles in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
    )
    .expect("Failed to create SYNC_DURATION metric - this should never happen")
});

static SNAPSHOTS_PUBLISHED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "nodeport_proxy_snapshots_published_total",
        "Total number of snapshots published to the xDS cache",
    )
    .expect("Failed to create SNAPSHOTS_PUBLISHED_TOTAL metric - this should never happen")
});

static SNAPSHOT_VERSION: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "nodeport_proxy_snapshot_version",
        "Major version of the last published snapshot",
    )
    .expect("Failed to create SNAPSHOT_VERSION metric - this should never happen")
});

static EXPOSED_SERVICES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "nodeport_proxy_exposed_services",
        "Number of services exposed by the last published snapshot",
    )
    .expect("Failed to create EXPOSED_SERVICES metric - this should never happen")
});

static SYNC_REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "nodeport_proxy_sync_requeues_total",
            "Total number of sync retries scheduled",
        ),
        &["reason"],
    )
    .expect("Failed to create SYNC_REQUEUES_TOTAL metric - this should never happen")
});

static XDS_STREAMS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "nodeport_proxy_xds_streams_active",
        "Number of currently open xDS streams",
    )
    .expect("Failed to create XDS_STREAMS_ACTIVE metric - this should never happen")
});

static XDS_RESPONSES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "nodeport_proxy_xds_responses_total",
            "Total number of discovery responses sent",
        ),
        &["type_url"],
    )
    .expect("Failed to create XDS_RESPONSES_TOTAL metric - this should never happen")
});

static XDS_NACKS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "nodeport_proxy_xds_nacks_total",
            "Total number of configurations rejected by Envoy",
        ),
        &["type_url"],
    )
    .expect("Failed to create XDS_NACKS_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(SYNCS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_DURATION.clone()))?;
    REGISTRY.register(Box::new(SNAPSHOTS_PUBLISHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SNAPSHOT_VERSION.clone()))?;
    REGISTRY.register(Box::new(EXPOSED_SERVICES.clone()))?;
    REGISTRY.register(Box::new(SYNC_REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(XDS_STREAMS_ACTIVE.clone()))?;
    REGISTRY.register(Box::new(XDS_RESPONSES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(XDS_NACKS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_syncs() {
    SYNCS_TOTAL.inc();
}

pub fn increment_sync_errors() {
    SYNC_ERRORS_TOTAL.inc();
}

pub fn observe_sync_duration(duration: f64) {
    SYNC_DURATION.observe(duration);
}

pub fn increment_snapshots_published() {
    SNAPSHOTS_PUBLISHED_TOTAL.inc();
}

pub fn set_snapshot_version(major: u64) {
    SNAPSHOT_VERSION.set(i64::try_from(major).unwrap_or(i64::MAX));
}

pub fn set_exposed_services(count: usize) {
    EXPOSED_SERVICES.set(i64::try_from(count).unwrap_or(i64::MAX));
}

pub fn increment_requeues_total(reason: &str) {
    SYNC_REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn inc_xds_streams_active() {
    XDS_STREAMS_ACTIVE.inc();
}

pub fn dec_xds_streams_active() {
    XDS_STREAMS_ACTIVE.dec();
}

pub fn increment_xds_responses(type_url: &str) {
    XDS_RESPONSES_TOTAL.with_label_values(&[type_url]).inc();
}

pub fn increment_xds_nacks(type_url: &str) {
    XDS_NACKS_TOTAL.with_label_values(&[type_url]).inc();
}

/// Snapshot of every registered metric family
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_syncs() {
        let before = SYNCS_TOTAL.get();
        increment_syncs();
        assert!(SYNCS_TOTAL.get() > before);
    }

    #[test]
    fn test_increment_sync_errors() {
        let before = SYNC_ERRORS_TOTAL.get();
        increment_sync_errors();
        assert!(SYNC_ERRORS_TOTAL.get() > before);
    }

    #[test]
    fn test_observe_sync_duration() {
        let before = SYNC_DURATION.get_sample_count();
        observe_sync_duration(0.02);
        assert!(SYNC_DURATION.get_sample_count() > before);
    }

    #[test]
    fn test_set_snapshot_version() {
        set_snapshot_version(7);
        assert_eq!(SNAPSHOT_VERSION.get(), 7);
    }

    #[test]
    fn test_set_exposed_services() {
        set_exposed_services(3);
        assert_eq!(EXPOSED_SERVICES.get(), 3);
    }

    #[test]
    fn test_increment_xds_nacks_by_type() {
        let type_url = "type.googleapis.com/test.Nack";
        let before = XDS_NACKS_TOTAL.with_label_values(&[type_url]).get();
        increment_xds_nacks(type_url);
        assert_eq!(
            XDS_NACKS_TOTAL.with_label_values(&[type_url]).get(),
            before + 1u64
        );
    }

    #[test]
    fn test_increment_requeues_total() {
        let before = SYNC_REQUEUES_TOTAL.with_label_values(&["test"]).get();
        increment_requeues_total("test");
        assert_eq!(
            SYNC_REQUEUES_TOTAL.with_label_values(&["test"]).get(),
            before + 1u64
        );
    }
}
