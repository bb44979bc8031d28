//! The share payload that rides inside a kind-1337 rumor (spec sections 3
//! and 6). This is the *decrypted* content only devices addressed as the
//! recipient of a gift wrap ever see — the share codec (`horcrux-shares`)
//! produces the raw `(index, y_bytes)` pair; this struct is the wire
//! envelope around it plus the metadata recipients need to judge relevance.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::InputError;
use crate::ids::VaultId;

/// `{vault_id, plan_version, threshold, total, index, y_b64, content_digest,
/// instructions?}` (spec sections 3 and 6). `y_b64` is carried as a base64
/// string on the wire, matching the JSON shape in spec section 6 exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePayload {
    pub vault_id: VaultId,
    pub plan_version: u64,
    pub threshold: u8,
    pub total: u8,
    pub index: u8,
    pub y_b64: String,
    /// Hex SHA-256 of the plaintext secret, used by the recovery engine to
    /// verify reconstruction (spec section 4.3).
    pub content_digest: String,
    pub instructions: Option<String>,
}

impl SharePayload {
    pub fn encode_y(y_bytes: &[u8]) -> String {
        BASE64.encode(y_bytes)
    }

    pub fn decode_y(&self) -> Result<Vec<u8>, InputError> {
        BASE64
            .decode(&self.y_b64)
            .map_err(|e| InputError::ValidationFailure {
                message: format!("y_b64 is not valid base64: {e}"),
            })
    }
}
