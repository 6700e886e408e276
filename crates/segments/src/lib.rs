//! Client segment store
//!
//! The uplink-side pipeline: buffer a segment, store it inline at the
//! satellite or erasure-code it across storage nodes, and read it back with
//! partial-failure tolerance.

mod store;

pub use store::{calc_needed_nodes, SegmentStore};

use orbit_erasure::ErasureError;
use orbit_metainfo::MetainfoError;
use orbit_piecestore::PieceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("{0}")]
    KeyNotFound(String),

    #[error("not enough storage nodes accepted pieces: {successful} of {required}")]
    NotEnoughStorage { successful: usize, required: usize },

    #[error("not enough shares: have {have}, need {need}")]
    NotEnoughShares { have: usize, need: usize },

    #[error("segment of {size} bytes exceeds maximum of {max}")]
    SegmentTooLarge { size: u64, max: u64 },

    #[error("invalid segment component: {0:?}")]
    InvalidPath(String),

    #[error(transparent)]
    Metainfo(MetainfoError),

    #[error(transparent)]
    Erasure(ErasureError),

    #[error(transparent)]
    Piece(PieceError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MetainfoError> for SegmentError {
    fn from(err: MetainfoError) -> Self {
        match err {
            MetainfoError::NotFound(message) => SegmentError::KeyNotFound(message),
            other => SegmentError::Metainfo(other),
        }
    }
}

impl From<PieceError> for SegmentError {
    fn from(err: PieceError) -> Self {
        match err {
            PieceError::NotEnoughShares { have, need } => {
                SegmentError::NotEnoughShares { have, need }
            }
            other => SegmentError::Piece(other),
        }
    }
}

impl From<ErasureError> for SegmentError {
    fn from(err: ErasureError) -> Self {
        match err {
            ErasureError::NotEnoughShares { have, need } => {
                SegmentError::NotEnoughShares { have, need }
            }
            other => SegmentError::Erasure(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SegmentError>;
