//! Systematic Reed–Solomon erasure coding over GF(2^8)
//!
//! The codec behind segment placement, audit correction, and repair. The
//! field uses the polynomial `x^8 + x^4 + x^3 + x^2 + 1` (0x11D) with
//! generator 2; the data polynomial passes through points `x = 0..k-1`, so
//! the first `k` of `n` shares reproduce the stripe verbatim and every
//! encoder in the system produces byte-identical shares.

mod gf256;
mod rs;
mod segment;

pub use rs::{Correction, ReedSolomon, Share};
pub use segment::{decode_segment, encode_segment, stripe_of};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ErasureError {
    #[error("invalid erasure parameters: {0}")]
    InvalidParameters(String),

    #[error("not enough shares: have {have}, need {need}")]
    NotEnoughShares { have: usize, need: usize },

    #[error("share {number} has size {got}, expected {expected}")]
    ShareSizeMismatch {
        number: usize,
        got: usize,
        expected: usize,
    },

    #[error("duplicate share number {0}")]
    DuplicateShare(usize),

    #[error("share number {0} out of range")]
    ShareOutOfRange(usize),

    #[error("no consistent correction found")]
    CorrectionFailed,
}

pub type Result<T> = std::result::Result<T, ErasureError>;
