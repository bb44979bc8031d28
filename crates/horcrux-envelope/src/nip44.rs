//! NIP-44 v2 authenticated encryption (spec section 4.2).
//!
//! `conversation_key = HKDF-Extract(salt="nip44-v2", ikm=shared_secret)`;
//! per message, `(chacha_key, chacha_nonce, hmac_key) =
//! HKDF-Expand(conversation_key, info=nonce, 76 bytes)`. Ciphertext is
//! padded plaintext under ChaCha20; the envelope is
//! `base64(0x02 ‖ nonce ‖ ciphertext ‖ hmac_sha256(hmac_key, nonce‖ciphertext))`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

const VERSION: u8 = 0x02;
const NONCE_LEN: usize = 32;
const MAC_LEN: usize = 32;
const EXPAND_LEN: usize = 76; // 32 (chacha key) + 12 (chacha nonce) + 32 (hmac key)

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Nip44Error {
    #[error("ciphertext too short to contain version, nonce, and mac")]
    Truncated,
    #[error("unsupported version byte")]
    UnsupportedVersion,
    #[error("mac verification failed")]
    MacMismatch,
    #[error("padded plaintext was malformed")]
    BadPadding,
    #[error("base64 decoding failed")]
    BadBase64,
}

fn conversation_key(shared_secret: &[u8; 32]) -> [u8; 32] {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac =
        HmacSha256::new_from_slice(b"nip44-v2").expect("hmac accepts keys of any length");
    mac.update(shared_secret);
    mac.finalize().into_bytes().into()
}

fn expand(conversation_key: &[u8; 32], nonce: &[u8; NONCE_LEN]) -> ([u8; 32], [u8; 12], [u8; 32]) {
    let hk = Hkdf::<Sha256>::from_prk(conversation_key).expect("32-byte PRK is valid for SHA-256");
    let mut okm = [0u8; EXPAND_LEN];
    hk.expand(nonce, &mut okm)
        .expect("76 bytes is well within HKDF-SHA256's output limit");
    let mut chacha_key = [0u8; 32];
    let mut chacha_nonce = [0u8; 12];
    let mut hmac_key = [0u8; 32];
    chacha_key.copy_from_slice(&okm[0..32]);
    chacha_nonce.copy_from_slice(&okm[32..44]);
    hmac_key.copy_from_slice(&okm[44..76]);
    (chacha_key, chacha_nonce, hmac_key)
}

/// Pad to the next power-of-two length ≥ 32, prefixed with the original
/// length as big-endian u16 (spec section 4.3's share-length rationale
/// applies equally here — envelope length must not leak plaintext length).
fn pad(plaintext: &[u8]) -> Vec<u8> {
    let prefixed_len = plaintext.len() + 2;
    let mut total = 32usize;
    while total < prefixed_len {
        total *= 2;
    }
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(plaintext.len() as u16).to_be_bytes());
    out.extend_from_slice(plaintext);
    out.resize(total, 0u8);
    out
}

fn unpad(padded: &[u8]) -> Result<Vec<u8>, Nip44Error> {
    if padded.len() < 2 {
        return Err(Nip44Error::BadPadding);
    }
    let len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if 2 + len > padded.len() {
        return Err(Nip44Error::BadPadding);
    }
    Ok(padded[2..2 + len].to_vec())
}

fn compute_mac(hmac_key: &[u8; 32], nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> [u8; MAC_LEN] {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(hmac_key).expect("hmac accepts keys of any length");
    mac.update(nonce);
    mac.update(ciphertext);
    mac.finalize().into_bytes().into()
}

/// Encrypt `plaintext` under the ECDH shared secret, returning the
/// base64-encoded envelope.
pub fn encrypt(shared_secret: &[u8; 32], plaintext: &[u8]) -> String {
    let conv_key = conversation_key(shared_secret);
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let (chacha_key, chacha_nonce, hmac_key) = expand(&conv_key, &nonce);

    let mut buf = pad(plaintext);
    let mut cipher = ChaCha20::new(&chacha_key.into(), &chacha_nonce.into());
    cipher.apply_keystream(&mut buf);
    let ciphertext = buf;

    let mac = compute_mac(&hmac_key, &nonce, &ciphertext);

    let mut payload = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len() + MAC_LEN);
    payload.push(VERSION);
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);
    payload.extend_from_slice(&mac);
    BASE64.encode(payload)
}

/// Decrypt a base64 envelope produced by [`encrypt`].
pub fn decrypt(shared_secret: &[u8; 32], envelope: &str) -> Result<Vec<u8>, Nip44Error> {
    let payload = BASE64.decode(envelope).map_err(|_| Nip44Error::BadBase64)?;
    if payload.len() < 1 + NONCE_LEN + MAC_LEN {
        return Err(Nip44Error::Truncated);
    }
    if payload[0] != VERSION {
        return Err(Nip44Error::UnsupportedVersion);
    }
    let nonce: [u8; NONCE_LEN] = payload[1..1 + NONCE_LEN].try_into().unwrap();
    let mac_start = payload.len() - MAC_LEN;
    let ciphertext = &payload[1 + NONCE_LEN..mac_start];
    let received_mac = &payload[mac_start..];

    let conv_key = conversation_key(shared_secret);
    let (chacha_key, chacha_nonce, hmac_key) = expand(&conv_key, &nonce);

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(&hmac_key).expect("hmac accepts keys of any length");
    mac.update(&nonce);
    mac.update(ciphertext);
    mac.verify_slice(received_mac)
        .map_err(|_| Nip44Error::MacMismatch)?;

    let mut buf = ciphertext.to_vec();
    let mut cipher = ChaCha20::new(&chacha_key.into(), &chacha_nonce.into());
    cipher.apply_keystream(&mut buf);

    unpad(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_short_message() {
        let secret = [7u8; 32];
        let cipher = encrypt(&secret, b"hunter2");
        let plain = decrypt(&secret, &cipher).unwrap();
        assert_eq!(plain, b"hunter2");
    }

    #[test]
    fn wrong_key_fails_mac() {
        let secret = [1u8; 32];
        let other = [2u8; 32];
        let cipher = encrypt(&secret, b"top secret");
        assert_eq!(decrypt(&other, &cipher), Err(Nip44Error::MacMismatch));
    }

    #[test]
    fn tampered_ciphertext_fails_mac() {
        let secret = [3u8; 32];
        let cipher = encrypt(&secret, b"don't touch me");
        let mut bytes = BASE64.decode(&cipher).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let tampered = BASE64.encode(bytes);
        assert_eq!(decrypt(&secret, &tampered), Err(Nip44Error::MacMismatch));
    }

    #[test]
    fn padded_length_hides_short_length_differences() {
        let secret = [9u8; 32];
        let a = encrypt(&secret, b"a");
        let b = encrypt(&secret, b"bb");
        // Both pad up to the same 32-byte minimum, so envelope lengths match
        // even though plaintext lengths differ.
        assert_eq!(
            BASE64.decode(a).unwrap().len(),
            BASE64.decode(b).unwrap().len()
        );
    }
}
