//! Containment: pending audits for nodes that answered too slowly.

use async_trait::async_trait;
use orbit_types::{NodeId, PieceId};
use std::collections::HashMap;
use std::sync::Mutex;

/// Record of a share a contained node still owes the auditor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAudit {
    pub node_id: NodeId,
    pub piece_id: PieceId,
    pub stripe_index: u64,
    pub share_size: u32,
    /// SHA-256 of the share the node is expected to return.
    pub expected_share_hash: Vec<u8>,
}

/// Store of pending audits keyed by node.
#[async_trait]
pub trait ContainmentStore: Send + Sync {
    async fn get(&self, node_id: &NodeId) -> Option<PendingAudit>;

    async fn put(&self, pending: PendingAudit);

    /// Remove the node's record; returns whether one existed.
    async fn delete(&self, node_id: &NodeId) -> bool;
}

/// In-memory containment store.
#[derive(Default)]
pub struct MemoryContainment {
    pending: Mutex<HashMap<NodeId, PendingAudit>>,
}

impl MemoryContainment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().expect("containment lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContainmentStore for MemoryContainment {
    async fn get(&self, node_id: &NodeId) -> Option<PendingAudit> {
        self.pending
            .lock()
            .expect("containment lock poisoned")
            .get(node_id)
            .cloned()
    }

    async fn put(&self, pending: PendingAudit) {
        self.pending
            .lock()
            .expect("containment lock poisoned")
            .insert(pending.node_id, pending);
    }

    async fn delete(&self, node_id: &NodeId) -> bool {
        self.pending
            .lock()
            .expect("containment lock poisoned")
            .remove(node_id)
            .is_some()
    }
}
