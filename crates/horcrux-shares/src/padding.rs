//! PKCS#7-flavored fixed-block padding (spec section 4.3): share bytes are
//! padded before splitting so that share length does not leak the secret's
//! length. Classic PKCS#7 records the pad count in the trailing byte, which
//! cannot address a content/padding gap larger than 255 bytes; instead we
//! prefix a big-endian u16 length, matching the approach the envelope codec
//! uses for NIP-44 padding.

use crate::ShareError;

/// Shares are padded to the smallest multiple of this block size that fits
/// the content plus its length prefix (spec section 4.3 names 512 bytes).
pub const PADDED_BLOCK_SIZE: usize = 512;

pub fn pad(content: &[u8]) -> Vec<u8> {
    let prefixed_len = content.len() + 2;
    let mut total = PADDED_BLOCK_SIZE;
    while total < prefixed_len {
        total += PADDED_BLOCK_SIZE;
    }
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(content.len() as u16).to_be_bytes());
    out.extend_from_slice(content);
    out.resize(total, 0u8);
    out
}

pub fn unpad(padded: &[u8]) -> Result<Vec<u8>, ShareError> {
    if padded.len() < 2 {
        return Err(ShareError::BadPadding);
    }
    let len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if 2 + len > padded.len() {
        return Err(ShareError::BadPadding);
    }
    Ok(padded[2..2 + len].to_vec())
}
