//! Per-peer ordered message history
//!
//! Append-only: records are never mutated or removed, and each peer's history
//! keeps insertion order. History lives for the lifetime of the process.

use std::collections::HashMap;

use crate::types::{Direction, MessageRecord, PeerId};

// ----------------------------------------------------------------------------
// Message Store
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    histories: HashMap<PeerId, Vec<MessageRecord>>,
    total: usize,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: MessageRecord) {
        self.histories
            .entry(record.peer_id.clone())
            .or_default()
            .push(record);
        self.total += 1;
    }

    /// Message texts for a peer, oldest first
    pub fn messages(&self, peer_id: &PeerId) -> Vec<String> {
        self.records(peer_id)
            .iter()
            .map(|record| record.text.clone())
            .collect()
    }

    /// Full records for a peer, oldest first
    pub fn records(&self, peer_id: &PeerId) -> &[MessageRecord] {
        self.histories
            .get(peer_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Texts for a peer filtered by direction
    pub fn messages_in(&self, peer_id: &PeerId, direction: Direction) -> Vec<String> {
        self.records(peer_id)
            .iter()
            .filter(|record| record.direction == direction)
            .map(|record| record.text.clone())
            .collect()
    }

    /// Peers that have at least one record
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.histories.keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}
