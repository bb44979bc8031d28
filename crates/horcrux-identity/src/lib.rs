//! Local identity (C1): one secp256k1 keypair, scoped to the process.
//!
//! The private key never leaves this module's boundary: every other engine
//! talks to an [`Identity`] through `sign`/`ecdh`, never by reading the raw
//! bytes back out (spec section 4.1).

use bech32::{FromBase32, ToBase32, Variant};
use secp256k1::{Keypair, Parity, PublicKey, Scalar, Secp256k1, SecretKey, XOnlyPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroize;

use horcrux_core::Pubkey;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("invalid bech32 encoding: {0}")]
    InvalidBech32(String),
    #[error("cryptographic fault: {0}")]
    CryptoFault(String),
}

const NSEC_HRP: &str = "nsec";
const NPUB_HRP: &str = "npub";

/// A BIP-340 Schnorr signature over a 32-byte message hash.
pub type Signature = [u8; 64];

/// The local user's secp256k1 keypair. Clonable because the inner secret key
/// is `Copy`, but `Drop`-zeroized to avoid leaving copies of key material in
/// freed memory.
pub struct Identity {
    secp: Secp256k1<secp256k1::All>,
    keypair: Keypair,
}

impl Identity {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let sk = SecretKey::new(&mut rand::thread_rng());
        let keypair = Keypair::from_secret_key(&secp, &sk);
        Self { secp, keypair }
    }

    /// Import a private key from its 64-hex-char or Bech32 `nsec...` form.
    pub fn import(raw: &str) -> Result<Self, IdentityError> {
        let bytes = if raw.starts_with(NSEC_HRP) {
            decode_bech32(raw, NSEC_HRP)?
        } else {
            hex::decode(raw).map_err(|e| IdentityError::InvalidKey(e.to_string()))?
        };
        let mut bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidKey("private key must be 32 bytes".into()))?;
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&bytes).map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        bytes.zeroize();
        let keypair = Keypair::from_secret_key(&secp, &sk);
        Ok(Self { secp, keypair })
    }

    /// Export the private key as Bech32 `nsec...`.
    pub fn export_bech32(&self) -> String {
        let bytes = self.keypair.secret_key().secret_bytes();
        encode_bech32(NSEC_HRP, &bytes)
    }

    /// The x-only public key, 32 bytes.
    pub fn pubkey(&self) -> Pubkey {
        let (xonly, _parity) = self.keypair.x_only_public_key();
        Pubkey::from_bytes(xonly.serialize())
    }

    pub fn pubkey_hex(&self) -> String {
        self.pubkey().to_hex()
    }

    pub fn pubkey_bech32(&self) -> String {
        encode_bech32(NPUB_HRP, self.pubkey().as_bytes())
    }

    /// Sign a 32-byte event id hash per BIP-340 (spec section 4.1, 4.2).
    pub fn sign(&self, event_id_hash: &[u8; 32]) -> Signature {
        let message = secp256k1::Message::from_digest(*event_id_hash);
        let sig = self.secp.sign_schnorr_no_aux_rand(&message, &self.keypair);
        sig.as_ref().try_into().expect("schnorr signatures are 64 bytes")
    }

    /// Verify a signature against an x-only pubkey (used by recipients to
    /// authenticate rumors; the envelope codec relies on this).
    pub fn verify(pubkey: &Pubkey, event_id_hash: &[u8; 32], signature: &Signature) -> bool {
        let secp = Secp256k1::verification_only();
        let Ok(xonly) = XOnlyPublicKey::from_slice(pubkey.as_bytes()) else {
            return false;
        };
        let Ok(sig) = secp256k1::schnorr::Signature::from_slice(signature) else {
            return false;
        };
        let message = secp256k1::Message::from_digest(*event_id_hash);
        secp.verify_schnorr(&sig, &message, &xonly).is_ok()
    }

    /// ECDH shared secret: the raw x-coordinate of `peer_pubkey · self`, as
    /// required by NIP-44 (spec section 4.2) — *not* the SHA-256-hashed
    /// variant some ECDH APIs default to.
    pub fn ecdh(&self, peer_pubkey: &Pubkey) -> Result<[u8; 32], IdentityError> {
        let peer_xonly = XOnlyPublicKey::from_slice(peer_pubkey.as_bytes())
            .map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        // Nostr convention: lift an x-only point assuming even parity.
        let peer_point = PublicKey::from_x_only_public_key(peer_xonly, Parity::Even);
        let scalar = Scalar::from_be_bytes(self.keypair.secret_key().secret_bytes())
            .map_err(|e| IdentityError::CryptoFault(e.to_string()))?;
        let shared_point = peer_point
            .mul_tweak(&self.secp, &scalar)
            .map_err(|e| IdentityError::CryptoFault(e.to_string()))?;
        let (xonly, _) = shared_point.x_only_public_key();
        Ok(xonly.serialize())
    }
}

/// Generate a fresh keypair, sign exactly one message with it, then discard
/// the private key. Used for gift-wrap outer envelopes (spec section 4.2).
pub struct EphemeralIdentity {
    identity: Identity,
}

impl EphemeralIdentity {
    pub fn generate() -> Self {
        Self {
            identity: Identity::generate(),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.identity.pubkey()
    }

    pub fn sign(&self, event_id_hash: &[u8; 32]) -> Signature {
        self.identity.sign(event_id_hash)
    }

    pub fn ecdh(&self, peer_pubkey: &Pubkey) -> Result<[u8; 32], IdentityError> {
        self.identity.ecdh(peer_pubkey)
    }
}

fn encode_bech32(hrp: &str, bytes: &[u8]) -> String {
    bech32::encode(hrp, bytes.to_base32(), Variant::Bech32)
        .expect("hrp and data are always valid for bech32 encoding")
}

fn decode_bech32(s: &str, expected_hrp: &str) -> Result<Vec<u8>, IdentityError> {
    let (hrp, data, variant) =
        bech32::decode(s).map_err(|e| IdentityError::InvalidBech32(e.to_string()))?;
    if hrp != expected_hrp {
        return Err(IdentityError::InvalidBech32(format!(
            "expected hrp {expected_hrp}, got {hrp}"
        )));
    }
    if variant != Variant::Bech32 {
        return Err(IdentityError::InvalidBech32("expected bech32, not bech32m".into()));
    }
    Vec::<u8>::from_base32(&data).map_err(|e| IdentityError::InvalidBech32(e.to_string()))
}

/// SHA-256 helper shared by envelope/share codecs needing a plain digest
/// rather than a signature.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let identity = Identity::generate();
        let digest = sha256(b"hello world");
        let sig = identity.sign(&digest);
        assert!(Identity::verify(&identity.pubkey(), &digest, &sig));
    }

    #[test]
    fn verify_rejects_wrong_pubkey() {
        let identity = Identity::generate();
        let other = Identity::generate();
        let digest = sha256(b"hello world");
        let sig = identity.sign(&digest);
        assert!(!Identity::verify(&other.pubkey(), &digest, &sig));
    }

    #[test]
    fn bech32_round_trips() {
        let identity = Identity::generate();
        let nsec = identity.export_bech32();
        let restored = Identity::import(&nsec).unwrap();
        assert_eq!(identity.pubkey(), restored.pubkey());
    }

    #[test]
    fn hex_import_matches_bech32_import() {
        let identity = Identity::generate();
        let hex_sk = hex::encode(identity.keypair.secret_key().secret_bytes());
        let restored = Identity::import(&hex_sk).unwrap();
        assert_eq!(identity.pubkey(), restored.pubkey());
    }

    #[test]
    fn ecdh_is_symmetric() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let s1 = alice.ecdh(&bob.pubkey()).unwrap();
        let s2 = bob.ecdh(&alice.pubkey()).unwrap();
        assert_eq!(s1, s2);
    }

    #[test]
    fn rejects_malformed_bech32() {
        let err = Identity::import("nsec1notreal").unwrap_err();
        assert_matches::assert_matches!(err, IdentityError::InvalidBech32(_));
    }
}
