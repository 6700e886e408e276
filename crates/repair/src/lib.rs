//! Segment repairer
//!
//! Given a segment whose healthy-piece count has dropped to the repair
//! threshold, reconstructs the segment from surviving pieces and rewrites
//! the missing ones to freshly selected nodes.

mod metrics;
mod repairer;

pub use metrics::RepairMetrics;
pub use repairer::{Repairer, RepairerConfig};

use orbit_erasure::ErasureError;
use orbit_metainfo::MetainfoError;
use orbit_orders::OrderError;
use orbit_overlay::OverlayError;
use orbit_piecestore::PieceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("cannot repair inline segment {0}")]
    InlineSegment(String),

    #[error("segment {path} cannot be repaired: {healthy} healthy pieces, {required} required")]
    Irreparable {
        path: String,
        healthy: usize,
        required: usize,
    },

    #[error(
        "segment {path} with {healthy} pieces above repair threshold {repair_threshold}, repair unnecessary"
    )]
    Unnecessary {
        path: String,
        healthy: usize,
        repair_threshold: usize,
    },

    #[error("repair timed out")]
    Timeout,

    #[error("repair cancelled")]
    Cancelled,

    #[error("metainfo error: {0}")]
    Metainfo(#[from] MetainfoError),

    #[error("order error: {0}")]
    Order(#[from] OrderError),

    #[error("overlay error: {0}")]
    Overlay(#[from] OverlayError),

    #[error("erasure error: {0}")]
    Erasure(#[from] ErasureError),

    #[error("piece error: {0}")]
    Piece(#[from] PieceError),
}

pub type Result<T> = std::result::Result<T, RepairError>;
