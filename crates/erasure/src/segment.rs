//! Segment-level helpers: whole-segment encode to pieces and back.
//!
//! A piece is the concatenation of one share per stripe; the final stripe is
//! zero-padded and decode truncates back to the original size.

use crate::rs::{ReedSolomon, Share};
use crate::{ErasureError, Result};
use orbit_types::RedundancyScheme;

/// Extract stripe `index` of a segment, zero-padded to the stripe size.
pub fn stripe_of(data: &[u8], scheme: &RedundancyScheme, index: u64) -> Vec<u8> {
    let stripe_size = scheme.stripe_size() as usize;
    let start = (index * scheme.stripe_size()) as usize;
    let mut stripe = vec![0u8; stripe_size];
    if start < data.len() {
        let end = usize::min(start + stripe_size, data.len());
        stripe[..end - start].copy_from_slice(&data[start..end]);
    }
    stripe
}

/// Erasure-code a whole segment into `n` pieces.
pub fn encode_segment(data: &[u8], scheme: &RedundancyScheme) -> Result<Vec<Vec<u8>>> {
    let rs = ReedSolomon::new(scheme.min_req as usize, scheme.total as usize)?;
    let stripe_count = scheme.stripe_count(data.len() as u64);
    let share_size = scheme.share_size as usize;

    let mut pieces: Vec<Vec<u8>> = (0..scheme.total)
        .map(|_| Vec::with_capacity(stripe_count as usize * share_size))
        .collect();
    for index in 0..stripe_count {
        let stripe = stripe_of(data, scheme, index);
        let shares = rs.encode(&stripe)?;
        for share in shares {
            pieces[share.number].extend_from_slice(&share.data);
        }
    }
    Ok(pieces)
}

/// Reconstruct a segment of `size` bytes from at least `k` whole pieces.
///
/// Each entry pairs a piece number with the full piece bytes.
pub fn decode_segment(
    pieces: &[(usize, Vec<u8>)],
    scheme: &RedundancyScheme,
    size: u64,
) -> Result<Vec<u8>> {
    let rs = ReedSolomon::new(scheme.min_req as usize, scheme.total as usize)?;
    if pieces.len() < scheme.min_req as usize {
        return Err(ErasureError::NotEnoughShares {
            have: pieces.len(),
            need: scheme.min_req as usize,
        });
    }

    let stripe_count = scheme.stripe_count(size);
    let share_size = scheme.share_size as usize;
    let expected = (stripe_count as usize) * share_size;
    for (number, data) in pieces {
        if data.len() != expected {
            return Err(ErasureError::ShareSizeMismatch {
                number: *number,
                got: data.len(),
                expected,
            });
        }
    }

    let mut segment = Vec::with_capacity(size as usize);
    for index in 0..stripe_count as usize {
        let shares: Vec<Share> = pieces
            .iter()
            .map(|(number, data)| Share {
                number: *number,
                data: data[index * share_size..(index + 1) * share_size].to_vec(),
            })
            .collect();
        segment.extend_from_slice(&rs.decode(&shares)?);
    }
    segment.truncate(size as usize);
    Ok(segment)
}
