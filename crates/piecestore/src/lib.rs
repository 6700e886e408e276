//! Piece transport: the byte-moving layer between clients and storage nodes
//!
//! Defines the dial/upload/download contract every byte-moving service
//! consumes, the storage-node side that enforces order limits, and the
//! erasure-coded client that fans pieces out and streams them back with
//! k-of-n failover.

mod client;
mod ec;
mod node;

pub use client::{NodeClient, NodeDialer};
pub use ec::{EcClient, EcConfig, InlineRanger, Ranger, RemoteRanger, UploadOutcome};
pub use node::StorageNode;

use thiserror::Error;

/// Transport-layer errors.
///
/// The audit classification depends on the split between [`Transport`]
/// (unreachable), [`Timeout`] (reachable but slow), and the rest.
#[derive(Debug, Error)]
pub enum PieceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("deadline exceeded")]
    Timeout,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("piece not found")]
    NotFound,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not enough shares: have {have}, need {need}")]
    NotEnoughShares { have: usize, need: usize },

    #[error("operation cancelled")]
    Cancelled,
}

impl PieceError {
    /// True for errors meaning the node could not be reached at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, PieceError::Transport(_))
    }

    /// True for deadline-exceeded errors.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PieceError::Timeout)
    }
}

pub type Result<T> = std::result::Result<T, PieceError>;
