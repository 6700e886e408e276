//! Fault-injecting in-memory network.

use async_trait::async_trait;
use orbit_piecestore::{NodeClient, NodeDialer, PieceError, StorageNode};
use orbit_types::{NodeId, OrderLimit};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct Fault {
    offline: bool,
    delay: Option<Duration>,
}

/// Dialer over in-process storage nodes with per-node fault injection.
#[derive(Default)]
pub struct MemNetwork {
    nodes: Mutex<HashMap<NodeId, Arc<StorageNode>>>,
    faults: Mutex<HashMap<NodeId, Fault>>,
}

impl MemNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: Arc<StorageNode>) {
        self.nodes
            .lock()
            .expect("network lock poisoned")
            .insert(node.id(), node);
    }

    pub fn node(&self, node_id: &NodeId) -> Option<Arc<StorageNode>> {
        self.nodes
            .lock()
            .expect("network lock poisoned")
            .get(node_id)
            .cloned()
    }

    pub fn set_offline(&self, node_id: &NodeId, offline: bool) {
        self.faults
            .lock()
            .expect("network lock poisoned")
            .entry(*node_id)
            .or_default()
            .offline = offline;
    }

    pub fn set_delay(&self, node_id: &NodeId, delay: Duration) {
        self.faults
            .lock()
            .expect("network lock poisoned")
            .entry(*node_id)
            .or_default()
            .delay = Some(delay);
    }

    fn fault(&self, node_id: &NodeId) -> Fault {
        self.faults
            .lock()
            .expect("network lock poisoned")
            .get(node_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl NodeDialer for MemNetwork {
    async fn dial(
        &self,
        node_id: NodeId,
        _address: &str,
    ) -> Result<Box<dyn NodeClient>, PieceError> {
        let fault = self.fault(&node_id);
        if fault.offline {
            return Err(PieceError::Transport("connection refused".to_string()));
        }
        let node = self
            .node(&node_id)
            .ok_or_else(|| PieceError::Transport(format!("unknown node {}", node_id)))?;
        Ok(Box::new(MemNodeClient {
            node,
            delay: fault.delay,
        }))
    }
}

struct MemNodeClient {
    node: Arc<StorageNode>,
    delay: Option<Duration>,
}

impl MemNodeClient {
    async fn stall(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl NodeClient for MemNodeClient {
    async fn upload(&self, limit: &OrderLimit, data: &[u8]) -> Result<Vec<u8>, PieceError> {
        self.stall().await;
        self.node.upload(limit, data)
    }

    async fn download(
        &self,
        limit: &OrderLimit,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, PieceError> {
        self.stall().await;
        self.node.download(limit, offset, length)
    }

    async fn delete(&self, limit: &OrderLimit) -> Result<(), PieceError> {
        self.stall().await;
        self.node.delete(limit)
    }
}
