//! The Reed–Solomon codec: encode, decode, correct, single-share encode.

use crate::gf256;
use crate::{ErasureError, Result};

/// One erasure share, tagged with its piece number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub number: usize,
    pub data: Vec<u8>,
}

/// Outcome of [`ReedSolomon::correct`].
#[derive(Debug, Clone)]
pub struct Correction {
    /// Piece numbers whose input data did not match the corrected codeword.
    pub flagged: Vec<usize>,
    /// Repaired copy of every input share, in input order.
    pub shares: Vec<Share>,
}

/// Systematic `(k, n)` Reed–Solomon code over GF(2^8).
#[derive(Debug, Clone, Copy)]
pub struct ReedSolomon {
    required: usize,
    total: usize,
}

impl ReedSolomon {
    pub fn new(required: usize, total: usize) -> Result<Self> {
        if required == 0 {
            return Err(ErasureError::InvalidParameters(
                "required shares must be >= 1".to_string(),
            ));
        }
        if total < required {
            return Err(ErasureError::InvalidParameters(
                "total shares below required".to_string(),
            ));
        }
        if total > 256 {
            return Err(ErasureError::InvalidParameters(
                "total shares exceed field size".to_string(),
            ));
        }
        Ok(Self { required, total })
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Encode a stripe of `k * share_size` bytes into `n` shares.
    ///
    /// The first `k` shares are the stripe slices verbatim.
    pub fn encode(&self, stripe: &[u8]) -> Result<Vec<Share>> {
        let share_size = self.share_size_of(stripe)?;
        let mut shares = Vec::with_capacity(self.total);
        for number in 0..self.required {
            shares.push(Share {
                number,
                data: stripe[number * share_size..(number + 1) * share_size].to_vec(),
            });
        }
        for number in self.required..self.total {
            shares.push(Share {
                number,
                data: self.evaluate(stripe, share_size, number as u8),
            });
        }
        Ok(shares)
    }

    /// Produce the single share `number` without materializing the full set.
    pub fn encode_single(&self, stripe: &[u8], number: usize) -> Result<Vec<u8>> {
        if number >= self.total {
            return Err(ErasureError::ShareOutOfRange(number));
        }
        let share_size = self.share_size_of(stripe)?;
        if number < self.required {
            return Ok(stripe[number * share_size..(number + 1) * share_size].to_vec());
        }
        Ok(self.evaluate(stripe, share_size, number as u8))
    }

    /// Reconstruct the stripe from any `k` or more shares.
    pub fn decode(&self, shares: &[Share]) -> Result<Vec<u8>> {
        let share_size = self.validate_shares(shares)?;
        let mut basis: Vec<&Share> = shares.iter().collect();
        basis.sort_by_key(|share| share.number);
        basis.truncate(self.required);
        Ok(self.interpolate_stripe(&basis, share_size))
    }

    /// Detect altered shares and return a repaired copy of every input.
    ///
    /// Searches hypotheses in ascending order of flagged-share count; among
    /// consistent hypotheses with the same count, the one whose flagged piece
    /// numbers sum lowest wins, so every replica of the caller reaches the
    /// same verdict.
    pub fn correct(&self, shares: &[Share]) -> Result<Correction> {
        let share_size = self.validate_shares(shares)?;

        let mut sorted: Vec<&Share> = shares.iter().collect();
        sorted.sort_by_key(|share| share.number);

        if sorted.len() == self.required {
            // no redundancy to check against
            return Ok(Correction {
                flagged: Vec::new(),
                shares: shares.to_vec(),
            });
        }

        let max_errors = sorted.len() - self.required;
        for errors in 0..=max_errors {
            let mut best: Option<(Vec<usize>, Vec<Share>, usize)> = None;

            for excluded in Combinations::new(sorted.len(), errors) {
                let kept: Vec<&Share> = sorted
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !excluded.contains(i))
                    .map(|(_, share)| *share)
                    .collect();

                let basis = &kept[..self.required];
                let stripe = self.interpolate_stripe(basis, share_size);

                let consistent = kept.iter().all(|share| {
                    self.encode_single(&stripe, share.number)
                        .map(|data| data == share.data)
                        .unwrap_or(false)
                });
                if !consistent {
                    continue;
                }

                let corrected: Vec<Share> = shares
                    .iter()
                    .map(|share| Share {
                        number: share.number,
                        data: self
                            .encode_single(&stripe, share.number)
                            .expect("share number already validated"),
                    })
                    .collect();
                let flagged: Vec<usize> = shares
                    .iter()
                    .zip(&corrected)
                    .filter(|(original, repaired)| original.data != repaired.data)
                    .map(|(original, _)| original.number)
                    .collect();
                let number_sum: usize = flagged.iter().sum();

                let better = match &best {
                    None => true,
                    Some((best_flagged, _, best_sum)) => {
                        (flagged.len(), number_sum) < (best_flagged.len(), *best_sum)
                    }
                };
                if better {
                    best = Some((flagged, corrected, number_sum));
                }
            }

            if let Some((flagged, corrected, _)) = best {
                return Ok(Correction {
                    flagged,
                    shares: corrected,
                });
            }
        }

        Err(ErasureError::CorrectionFailed)
    }

    fn share_size_of(&self, stripe: &[u8]) -> Result<usize> {
        if stripe.is_empty() || stripe.len() % self.required != 0 {
            return Err(ErasureError::InvalidParameters(format!(
                "stripe of {} bytes does not divide into {} shares",
                stripe.len(),
                self.required
            )));
        }
        Ok(stripe.len() / self.required)
    }

    fn validate_shares(&self, shares: &[Share]) -> Result<usize> {
        if shares.len() < self.required {
            return Err(ErasureError::NotEnoughShares {
                have: shares.len(),
                need: self.required,
            });
        }
        let share_size = shares[0].data.len();
        let mut seen = [false; 256];
        for share in shares {
            if share.number >= self.total {
                return Err(ErasureError::ShareOutOfRange(share.number));
            }
            if seen[share.number] {
                return Err(ErasureError::DuplicateShare(share.number));
            }
            seen[share.number] = true;
            if share.data.len() != share_size {
                return Err(ErasureError::ShareSizeMismatch {
                    number: share.number,
                    got: share.data.len(),
                    expected: share_size,
                });
            }
        }
        if share_size == 0 {
            return Err(ErasureError::InvalidParameters(
                "empty shares".to_string(),
            ));
        }
        Ok(share_size)
    }

    /// Evaluate the data polynomial at `x = target` for every byte column.
    fn evaluate(&self, stripe: &[u8], share_size: usize, target: u8) -> Vec<u8> {
        let coefficients = interp_coeffs(
            &(0..self.required as u8).collect::<Vec<_>>(),
            target,
        );
        let mut data = vec![0u8; share_size];
        for (j, coefficient) in coefficients.iter().enumerate() {
            let source = &stripe[j * share_size..(j + 1) * share_size];
            for (out, value) in data.iter_mut().zip(source) {
                *out = gf256::add(*out, gf256::mul(*coefficient, *value));
            }
        }
        data
    }

    /// Rebuild the stripe (values at `x = 0..k-1`) from `k` basis shares.
    fn interpolate_stripe(&self, basis: &[&Share], share_size: usize) -> Vec<u8> {
        let xs: Vec<u8> = basis.iter().map(|share| share.number as u8).collect();
        let mut stripe = vec![0u8; self.required * share_size];
        for target in 0..self.required {
            let slot = &mut stripe[target * share_size..(target + 1) * share_size];
            if let Some(share) = basis.iter().find(|share| share.number == target) {
                slot.copy_from_slice(&share.data);
                continue;
            }
            let coefficients = interp_coeffs(&xs, target as u8);
            for (share, coefficient) in basis.iter().zip(&coefficients) {
                for (out, value) in slot.iter_mut().zip(&share.data) {
                    *out = gf256::add(*out, gf256::mul(*coefficient, *value));
                }
            }
        }
        stripe
    }
}

/// Lagrange basis coefficients for evaluating at `target` from points `xs`.
fn interp_coeffs(xs: &[u8], target: u8) -> Vec<u8> {
    xs.iter()
        .enumerate()
        .map(|(i, &xi)| {
            let mut numerator = 1u8;
            let mut denominator = 1u8;
            for (j, &xj) in xs.iter().enumerate() {
                if i == j {
                    continue;
                }
                numerator = gf256::mul(numerator, gf256::add(target, xj));
                denominator = gf256::mul(denominator, gf256::add(xi, xj));
            }
            gf256::div(numerator, denominator)
        })
        .collect()
}

/// Lexicographic `k`-combinations of `0..n`.
struct Combinations {
    n: usize,
    indices: Vec<usize>,
    started: bool,
    exhausted: bool,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            indices: (0..k).collect(),
            started: false,
            exhausted: k > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.exhausted {
            return None;
        }
        if !self.started {
            self.started = true;
            return Some(self.indices.clone());
        }
        let k = self.indices.len();
        let mut i = k;
        loop {
            if i == 0 {
                self.exhausted = true;
                return None;
            }
            i -= 1;
            if self.indices[i] != i + self.n - k {
                break;
            }
        }
        self.indices[i] += 1;
        for j in i + 1..k {
            self.indices[j] = self.indices[j - 1] + 1;
        }
        Some(self.indices.clone())
    }
}
