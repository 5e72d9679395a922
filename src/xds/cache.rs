//! # Snapshot Cache
//!
//! Latest published snapshot per Envoy node id.
//!
//! Each node has a `tokio::sync::watch` channel so open xDS streams are woken
//! up when a new snapshot is published. Streams opened before the first
//! publish observe `None` until the synchronizer has run once.

use crate::xds::Snapshot;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{debug, warn};

type Slot = watch::Sender<Option<Arc<Snapshot>>>;

#[derive(Debug, Default)]
pub struct SnapshotCache {
    nodes: RwLock<HashMap<String, Slot>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `snapshot` for `node_id`, waking every stream watching it.
    pub fn set_snapshot(&self, node_id: &str, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        debug!(
            node = node_id,
            version = snapshot.version(),
            "setting snapshot"
        );
        self.with_slot(node_id, |slot| {
            slot.send_replace(Some(snapshot));
        });
    }

    /// Latest snapshot published for `node_id`
    pub fn snapshot(&self, node_id: &str) -> Option<Arc<Snapshot>> {
        let nodes = match self.nodes.read() {
            Ok(nodes) => nodes,
            Err(poisoned) => {
                warn!("snapshot cache lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        nodes.get(node_id).and_then(|slot| slot.borrow().clone())
    }

    /// Subscribe to snapshot changes for `node_id`.
    ///
    /// The receiver starts out with the current value marked as seen.
    pub fn watch(&self, node_id: &str) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.with_slot(node_id, Slot::subscribe)
    }

    fn with_slot<T>(&self, node_id: &str, f: impl FnOnce(&Slot) -> T) -> T {
        let mut nodes = match self.nodes.write() {
            Ok(nodes) => nodes,
            Err(poisoned) => {
                warn!("snapshot cache lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let slot = nodes
            .entry(node_id.to_string())
            .or_insert_with(|| watch::channel(None).0);
        f(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_none_before_publish() {
        let cache = SnapshotCache::new();
        assert!(cache.snapshot("kube").is_none());
    }

    #[test]
    fn test_snapshots_are_stored_per_node() {
        let cache = SnapshotCache::new();
        cache.set_snapshot("kube", Snapshot::empty("1.0.0"));

        assert_eq!(cache.snapshot("kube").unwrap().version(), "1.0.0");
        assert!(cache.snapshot("other").is_none());
    }

    #[tokio::test]
    async fn test_watch_is_notified_on_publish() {
        let cache = SnapshotCache::new();
        let mut rx = cache.watch("kube");
        assert!(rx.borrow().is_none());

        cache.set_snapshot("kube", Snapshot::empty("1.0.0"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().version(), "1.0.0");

        cache.set_snapshot("kube", Snapshot::empty("2.0.0"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().version(), "2.0.0");
    }
}
