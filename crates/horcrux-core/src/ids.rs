//! Identifier and key-encoding newtypes.
//!
//! Everything here is a thin wrapper around fixed-size bytes, hex-encoded at
//! the boundary. Keeping these distinct (rather than passing `String`/`Vec<u8>`
//! around) is what lets the compiler catch a vault id passed where a pubkey
//! was expected.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// A 128-bit random vault identifier, displayed as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VaultId([u8; 16]);

impl VaultId {
    /// Generate a fresh random vault id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for VaultId {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| InputError::ValidationFailure {
            message: format!("vault id {s} is not valid hex"),
        })?;
        let bytes: [u8; 16] = bytes.try_into().map_err(|_| InputError::ValidationFailure {
            message: format!("vault id {s} must decode to 16 bytes"),
        })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for VaultId {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VaultId> for String {
    fn from(value: VaultId) -> Self {
        value.to_string()
    }
}

/// Identifier for a recovery ceremony; a random UUID is sufficient since it
/// only needs to be unique per initiator, not globally orderable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecoveryRequestId(uuid::Uuid);

impl RecoveryRequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for RecoveryRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecoveryRequestId {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| InputError::ValidationFailure {
                message: format!("{s} is not a valid recovery request id"),
            })
    }
}

/// An x-only secp256k1 public key (32 bytes), the only trustworthy authorship
/// indicator per spec section 4.2 — gift-wrap outer pubkeys are ephemeral and
/// must never be stored as a `Pubkey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pubkey([u8; 32]);

impl Pubkey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Pubkey {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| InputError::InvalidKey {
            message: format!("pubkey {s} is not valid hex"),
        })?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| InputError::InvalidKey {
            message: "x-only pubkey must be 32 bytes".into(),
        })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Pubkey {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pubkey> for String {
    fn from(value: Pubkey) -> Self {
        value.to_string()
    }
}

/// The lowercase-hex SHA-256 event id used throughout the Nostr envelope
/// layer (spec section 4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId([u8; 32]);

impl EventId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for EventId {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| InputError::ValidationFailure {
            message: format!("event id {s} is not valid hex"),
        })?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| InputError::ValidationFailure {
            message: "event id must be 32 bytes".into(),
        })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for EventId {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventId> for String {
    fn from(value: EventId) -> Self {
        value.to_string()
    }
}

/// An invitation code: at least 128 bits of entropy, hex-encoded. Distinct
/// from `VaultId`/`Pubkey` so it can't be confused with either at a call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InviteCode(String);

impl InviteCode {
    /// Generate a fresh 128-bit invite code.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InviteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InviteCode {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if hex::decode(s).map(|b| b.len() * 8).unwrap_or(0) < 128 {
            return Err(InputError::InvalidInvitationCode {
                message: format!("invite code {s} carries less than 128 bits of entropy"),
            });
        }
        Ok(Self(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_id_round_trips_through_hex() {
        let id = VaultId::generate();
        let parsed: VaultId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn pubkey_rejects_wrong_length() {
        let err = "deadbeef".parse::<Pubkey>().unwrap_err();
        assert_matches::assert_matches!(err, InputError::InvalidKey { .. });
    }

    #[test]
    fn invite_code_requires_128_bits() {
        assert!("ab".parse::<InviteCode>().is_err());
        assert!(InviteCode::generate().as_str().parse::<InviteCode>().is_ok());
    }
}
