//! Transport contract consumed by the segment store, auditor, and repairer.

use crate::Result;
use async_trait::async_trait;
use orbit_types::{NodeId, OrderLimit};

/// A dialed connection to one storage node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Store a piece under the limit's piece ID; returns the node-computed
    /// piece hash.
    async fn upload(&self, limit: &OrderLimit, data: &[u8]) -> Result<Vec<u8>>;

    /// Read `length` bytes of the limit's piece starting at `offset`.
    async fn download(&self, limit: &OrderLimit, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// Remove the limit's piece.
    async fn delete(&self, limit: &OrderLimit) -> Result<()>;
}

/// Reaches storage nodes by ID and address.
#[async_trait]
pub trait NodeDialer: Send + Sync {
    async fn dial(&self, node_id: NodeId, address: &str) -> Result<Box<dyn NodeClient>>;
}
