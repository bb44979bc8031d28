//! Share codec (C3): t-of-n Shamir secret sharing over GF(2^8) using the
//! Rijndael reduction polynomial `x^8 + x^4 + x^3 + x + 1` (spec section 4.3).

mod gf256;
mod padding;

use sha2::{Digest, Sha256};
use thiserror::Error;

pub use padding::{pad, unpad, PADDED_BLOCK_SIZE};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShareError {
    #[error("threshold must be between 1 and the total share count")]
    InvalidThreshold,
    #[error("total share count must be between 1 and 255")]
    InvalidTotal,
    #[error("fewer than the threshold number of shares were supplied")]
    InsufficientShares,
    #[error("supplied shares have inconsistent byte lengths")]
    InconsistentShares,
    #[error("two shares share the same index")]
    DuplicateIndex,
    #[error("padded share data was malformed")]
    BadPadding,
}

/// One steward's share: `(index, y_bytes)` for `index ∈ [1, 255]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub index: u8,
    pub y_bytes: Vec<u8>,
}

/// Split `secret` into `total` shares, any `threshold` of which reconstruct
/// it (spec section 4.3). `secret` is *not* padded by this function — callers
/// that want length-hiding should pad first with [`pad`].
pub fn split(secret: &[u8], threshold: u8, total: u8) -> Result<Vec<Share>, ShareError> {
    if threshold == 0 || threshold > total {
        return Err(ShareError::InvalidThreshold);
    }
    if total == 0 {
        return Err(ShareError::InvalidTotal);
    }

    let mut shares: Vec<Vec<u8>> = vec![vec![0u8; secret.len()]; total as usize];
    let mut rng = rand::thread_rng();

    for (byte_idx, &secret_byte) in secret.iter().enumerate() {
        let mut coefficients = Vec::with_capacity(threshold as usize);
        coefficients.push(secret_byte);
        for _ in 1..threshold {
            coefficients.push(rand::Rng::gen::<u8>(&mut rng));
        }
        for x in 1..=total {
            shares[(x - 1) as usize][byte_idx] = gf256::eval_poly(&coefficients, x);
        }
    }

    Ok((1..=total)
        .zip(shares)
        .map(|(index, y_bytes)| Share { index, y_bytes })
        .collect())
}

/// Reconstruct the secret from at least `threshold` shares via per-byte
/// Lagrange interpolation at `x = 0` (spec section 4.3).
pub fn combine(shares: &[Share], threshold: u8) -> Result<Vec<u8>, ShareError> {
    if shares.len() < threshold as usize {
        return Err(ShareError::InsufficientShares);
    }

    let mut seen = std::collections::HashSet::new();
    for share in shares {
        if !seen.insert(share.index) {
            return Err(ShareError::DuplicateIndex);
        }
    }

    let len = shares[0].y_bytes.len();
    if shares.iter().any(|s| s.y_bytes.len() != len) {
        return Err(ShareError::InconsistentShares);
    }

    let mut secret = Vec::with_capacity(len);
    for byte_idx in 0..len {
        let points: Vec<(u8, u8)> = shares
            .iter()
            .map(|s| (s.index, s.y_bytes[byte_idx]))
            .collect();
        secret.push(gf256::interpolate_at_zero(&points));
    }
    Ok(secret)
}

/// Hex SHA-256 of `content`, recorded as `content_digest` in the share
/// payload so reconstruction can be verified (spec sections 3, 4.3).
pub fn content_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
