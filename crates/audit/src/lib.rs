//! Audit verifier
//!
//! Samples one stripe of a remote segment, downloads the corresponding share
//! from every piece holder, detects tampering through erasure correction,
//! and classifies each contacted node as success, failed, offline, or
//! contained.

mod containment;
mod metrics;
mod verifier;

pub use containment::{ContainmentStore, MemoryContainment, PendingAudit};
pub use metrics::AuditMetrics;
pub use verifier::{Stripe, Verifier, VerifierConfig};

use orbit_erasure::ErasureError;
use orbit_orders::OrderError;
use orbit_types::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("cannot audit inline segment")]
    NotRemote,

    #[error("not enough shares for successful audit: got {have}, required {need}")]
    NotEnoughShares {
        have: usize,
        need: usize,
        /// Nodes already classified offline before the audit gave up.
        offlines: Vec<NodeId>,
    },

    #[error("order error: {0}")]
    Order(#[from] OrderError),

    #[error("erasure error: {0}")]
    Erasure(#[from] ErasureError),

    #[error("containment error: {0}")]
    Containment(String),
}

pub type Result<T> = std::result::Result<T, AuditError>;

/// Outcome of a verify or reverify pass.
///
/// The four sets are pairwise disjoint and together cover every contacted
/// node.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub successes: Vec<NodeId>,
    pub fails: Vec<NodeId>,
    pub offlines: Vec<NodeId>,
    pub pending_audits: Vec<PendingAudit>,
}

impl Report {
    /// All nodes the pass reached a verdict on.
    pub fn contacted(&self) -> Vec<NodeId> {
        let mut nodes = self.successes.clone();
        nodes.extend(&self.fails);
        nodes.extend(&self.offlines);
        nodes.extend(self.pending_audits.iter().map(|pending| pending.node_id));
        nodes
    }
}
