//! Device registry: visible responders keyed by hardware identifier

use std::collections::HashMap;

use tokio::time::Instant;
use tracing::debug;

use crate::types::{PeerDescriptor, PeerId};

// ----------------------------------------------------------------------------
// Device Registry
// ----------------------------------------------------------------------------

/// Authoritative map of peer id → descriptor with freshness-based eviction.
///
/// Registry presence says nothing about connection liveness: a connected peer
/// that stops advertising is pruned like any other.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    peers: HashMap<PeerId, PeerDescriptor>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new peer or replace every field of a known one
    pub fn upsert(&mut self, descriptor: PeerDescriptor) {
        if let Some(existing) = self.peers.get_mut(&descriptor.id) {
            *existing = descriptor;
        } else {
            debug!(peer = %descriptor.id, name = %descriptor.name, "New device discovered");
            self.peers.insert(descriptor.id.clone(), descriptor);
        }
    }

    /// Remove every entry last seen strictly before `cutoff`, returning the evicted ids
    pub fn prune(&mut self, cutoff: Instant) -> Vec<PeerId> {
        let stale: Vec<PeerId> = self
            .peers
            .values()
            .filter(|peer| peer.last_seen < cutoff)
            .map(|peer| peer.id.clone())
            .collect();

        for peer_id in &stale {
            self.peers.remove(peer_id);
            debug!(peer = %peer_id, "Pruned stale device");
        }
        stale
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerDescriptor> {
        self.peers.get(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Owned view for publication, ordered by name then id
    pub fn snapshot(&self) -> Vec<PeerDescriptor> {
        let mut peers: Vec<PeerDescriptor> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        peers
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::PeerHandle;

    fn descriptor(id: &str, name: &str, last_seen: Instant) -> PeerDescriptor {
        PeerDescriptor {
            id: PeerId::new(id),
            name: name.to_string(),
            signal_strength: -60,
            last_seen,
            handle: PeerHandle::new(1),
        }
    }

    #[test]
    fn test_upsert_replaces_fields() {
        let t0 = Instant::now();
        let mut registry = DeviceRegistry::new();
        registry.upsert(descriptor("a", "Alpha", t0));

        let mut updated = descriptor("a", "Alpha Prime", t0 + Duration::from_secs(1));
        updated.signal_strength = -40;
        registry.upsert(updated.clone());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&PeerId::new("a")), Some(&updated));
    }

    #[test]
    fn test_prune_is_strictly_before_cutoff() {
        let t0 = Instant::now();
        let mut registry = DeviceRegistry::new();
        registry.upsert(descriptor("old", "Old", t0));
        registry.upsert(descriptor("edge", "Edge", t0 + Duration::from_secs(2)));
        registry.upsert(descriptor("new", "New", t0 + Duration::from_secs(3)));

        let removed = registry.prune(t0 + Duration::from_secs(2));
        assert_eq!(removed, vec![PeerId::new("old")]);
        assert!(registry.contains(&PeerId::new("edge")));
        assert!(registry.contains(&PeerId::new("new")));
    }

    #[test]
    fn test_snapshot_sorted_by_name_with_duplicates() {
        let t0 = Instant::now();
        let mut registry = DeviceRegistry::new();
        registry.upsert(descriptor("2", "MacChat", t0));
        registry.upsert(descriptor("3", "Unknown", t0));
        registry.upsert(descriptor("1", "MacChat", t0));
        registry.upsert(descriptor("4", "Basement", t0));

        let snapshot = registry.snapshot();
        let ordered: Vec<&str> = snapshot.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ordered, vec!["4", "1", "2", "3"]);
    }
}
