//! Reed–Solomon redundancy scheme parameters.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedundancyError {
    #[error("invalid redundancy scheme: {0}")]
    Invalid(String),
}

/// Erasure-coding parameters for a remote segment.
///
/// `min_req` (k) shares reconstruct the segment, `repair_threshold` (m) is the
/// healthy-piece count at or below which repair triggers, `success_threshold`
/// (o) is the target piece count after a successful upload or repair, and
/// `total` (n) is the number of pieces placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedundancyScheme {
    pub min_req: u16,
    pub repair_threshold: u16,
    pub success_threshold: u16,
    pub total: u16,
    /// Byte length of one erasure share.
    pub share_size: u32,
}

impl RedundancyScheme {
    pub fn new(
        min_req: u16,
        repair_threshold: u16,
        success_threshold: u16,
        total: u16,
        share_size: u32,
    ) -> Result<Self, RedundancyError> {
        let scheme = Self {
            min_req,
            repair_threshold,
            success_threshold,
            total,
            share_size,
        };
        scheme.validate()?;
        Ok(scheme)
    }

    /// Check the `1 <= k <= m <= o <= n` ordering and share size.
    ///
    /// `m == o` is accepted; it is the testing escape hatch recognized by
    /// commit validation.
    pub fn validate(&self) -> Result<(), RedundancyError> {
        if self.min_req == 0 {
            return Err(RedundancyError::Invalid("min_req must be >= 1".to_string()));
        }
        if self.min_req > self.repair_threshold {
            return Err(RedundancyError::Invalid(
                "repair threshold below min_req".to_string(),
            ));
        }
        if self.repair_threshold > self.success_threshold {
            return Err(RedundancyError::Invalid(
                "success threshold below repair threshold".to_string(),
            ));
        }
        if self.success_threshold > self.total {
            return Err(RedundancyError::Invalid(
                "total below success threshold".to_string(),
            ));
        }
        if self.total > 256 {
            return Err(RedundancyError::Invalid(
                "total exceeds 256 pieces".to_string(),
            ));
        }
        if self.share_size == 0 {
            return Err(RedundancyError::Invalid(
                "share size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Bytes of segment data covered by one stripe.
    pub fn stripe_size(&self) -> u64 {
        self.min_req as u64 * self.share_size as u64
    }

    /// Number of stripes needed for a segment of `size` bytes.
    pub fn stripe_count(&self, size: u64) -> u64 {
        let stripe = self.stripe_size();
        if size == 0 {
            return 0;
        }
        (size + stripe - 1) / stripe
    }

    /// Byte length of one piece for a segment of `size` bytes.
    pub fn piece_size(&self, size: u64) -> u64 {
        self.stripe_count(size) * self.share_size as u64
    }
}
