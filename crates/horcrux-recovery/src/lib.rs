//! Recovery engine (C8): the `pending → sent → in_progress → {completed,
//! failed, cancelled}` state machine for a single recovery ceremony (spec
//! section 4.8), plus the request/response rumor payloads it consumes.
//!
//! As with `horcrux-distribution`, this crate is pure/stateful logic only:
//! wrapping requests and responses as gift-wrapped rumors and publishing them
//! is the node composition root's job.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use horcrux_core::ids::{EventId, Pubkey, RecoveryRequestId, VaultId};
use horcrux_core::recovery::{RecoveryFailureReason, RecoveryRequest, RecoveryStatus, ResponseStatus};
use horcrux_core::share::SharePayload;
use horcrux_core::Timestamp;
use horcrux_shares::{combine, content_digest, unpad, Share};

pub const RECOVERY_REQUEST_KIND: u16 = 1338;
pub const RECOVERY_RESPONSE_KIND: u16 = 1339;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecoveryEngineError {
    #[error("response's recovery_request_id does not match this request")]
    RequestMismatch,
    #[error("response did not reference this vault")]
    VaultMismatch,
    #[error("response came from a pubkey not named on this request")]
    UnknownSteward,
    #[error("share codec rejected reconstruction: {0}")]
    ShareCodec(String),
    #[error("recovery failed: {0:?}")]
    Failed(RecoveryFailureReason),
}

/// The decrypted content of a kind-1338 rumor (spec section 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRequestPayload {
    pub recovery_request_id: RecoveryRequestId,
    pub vault_id: VaultId,
    pub requested_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub threshold: u8,
}

/// The decrypted content of a kind-1339 rumor (spec section 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryResponsePayload {
    pub recovery_request_id: RecoveryRequestId,
    pub vault_id: VaultId,
    pub approved: bool,
    pub shard_data: Option<SharePayload>,
    pub responded_at: Timestamp,
}

/// Mark a request as published. Idle until then it sits in `pending` (spec
/// section 4.8).
pub fn mark_sent(request: &mut RecoveryRequest) {
    if request.status == RecoveryStatus::Pending {
        request.status = RecoveryStatus::Sent;
    }
}

/// Initiator-side handling of an inbound steward response. First answer from
/// a given steward wins; later ones are a no-op, matching the confirmation
/// semantics in `horcrux-distribution`.
pub fn handle_response(
    request: &mut RecoveryRequest,
    vault_id: VaultId,
    responder_pubkey: Pubkey,
    response_event_id: EventId,
    payload: &RecoveryResponsePayload,
) -> Result<(), RecoveryEngineError> {
    if request.vault_id != vault_id || payload.vault_id != vault_id {
        return Err(RecoveryEngineError::VaultMismatch);
    }
    if payload.recovery_request_id != request.id {
        return Err(RecoveryEngineError::RequestMismatch);
    }

    let response = request
        .responses
        .get_mut(&responder_pubkey)
        .ok_or(RecoveryEngineError::UnknownSteward)?;

    if response.status != ResponseStatus::Pending {
        return Ok(());
    }

    response.status = if payload.approved { ResponseStatus::Approved } else { ResponseStatus::Denied };
    response.responded_at = Some(payload.responded_at);
    response.received_share = payload.shard_data.clone();
    response.event_id = Some(response_event_id);

    if request.status == RecoveryStatus::Sent {
        request.status = RecoveryStatus::InProgress;
    }
    Ok(())
}

/// Attempt to reconstruct the vault secret from whatever responses have
/// arrived so far (spec section 4.8). Responses are grouped by `plan_version`
/// before combining — shares from different plan generations never mix — and
/// the newest version that has reached `threshold` approvals wins. Returns
/// `Ok(None)` when no version has enough approvals yet and the request isn't
/// otherwise doomed; mutates `request.status` to a terminal state on success
/// or unrecoverable failure.
pub fn try_complete(request: &mut RecoveryRequest) -> Result<Option<Vec<u8>>, RecoveryEngineError> {
    if is_terminal(&request.status) {
        return Ok(None);
    }

    let threshold = request.threshold as usize;
    let total_stewards = request.responses.len();

    let mut by_version: HashMap<u64, Vec<&SharePayload>> = HashMap::new();
    for response in request.responses.values() {
        if response.status == ResponseStatus::Approved {
            if let Some(share) = response.received_share.as_ref() {
                by_version.entry(share.plan_version).or_default().push(share);
            }
        }
    }

    let candidate = by_version
        .into_iter()
        .filter(|(_, shares)| shares.len() >= threshold)
        .max_by_key(|(version, _)| *version);

    let Some((_version, shares)) = candidate else {
        if request.denied_count() > total_stewards.saturating_sub(threshold) {
            request.status = RecoveryStatus::Failed { reason: RecoveryFailureReason::Denied };
            return Err(RecoveryEngineError::Failed(RecoveryFailureReason::Denied));
        }
        return Ok(None);
    };

    let expected_digest = shares[0].content_digest.clone();
    let chosen: Vec<Share> = shares
        .iter()
        .take(threshold)
        .map(|s| {
            s.decode_y()
                .map(|y_bytes| Share { index: s.index, y_bytes })
                .map_err(|e| RecoveryEngineError::ShareCodec(e.to_string()))
        })
        .collect::<Result<_, _>>()?;

    let padded = combine(&chosen, request.threshold).map_err(|e| RecoveryEngineError::ShareCodec(e.to_string()))?;
    let plaintext = unpad(&padded).map_err(|e| RecoveryEngineError::ShareCodec(e.to_string()))?;

    if content_digest(&plaintext) != expected_digest {
        request.status = RecoveryStatus::Failed { reason: RecoveryFailureReason::DigestMismatch };
        return Err(RecoveryEngineError::Failed(RecoveryFailureReason::DigestMismatch));
    }

    request.status = RecoveryStatus::Completed;
    Ok(Some(plaintext))
}

/// Sweep a request for expiry (spec section 4.8, SPEC_FULL.md C.4). Returns
/// `true` if this call transitioned the request to `failed`.
pub fn check_expiry(request: &mut RecoveryRequest, now: Timestamp) -> bool {
    if is_terminal(&request.status) {
        return false;
    }
    match request.expires_at {
        Some(expires_at) if now >= expires_at => {
            for response in request.responses.values_mut() {
                if response.status == ResponseStatus::Pending {
                    response.status = ResponseStatus::Timeout;
                }
            }
            request.status = RecoveryStatus::Failed { reason: RecoveryFailureReason::Expired };
            true
        }
        _ => false,
    }
}

/// The initiator calls off the ceremony before it resolves.
pub fn cancel(request: &mut RecoveryRequest) {
    if !is_terminal(&request.status) {
        request.status = RecoveryStatus::Cancelled;
    }
}

fn is_terminal(status: &RecoveryStatus) -> bool {
    matches!(status, RecoveryStatus::Completed | RecoveryStatus::Failed { .. } | RecoveryStatus::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use horcrux_shares::{pad, split};

    fn sample_request(threshold: u8, stewards: &[Pubkey], expires_at: Option<Timestamp>) -> RecoveryRequest {
        RecoveryRequest::new(VaultId::generate(), Pubkey::from_bytes([9u8; 32]), 0, expires_at, threshold, stewards)
    }

    fn share_payload(vault_id: VaultId, plan_version: u64, threshold: u8, total: u8, index: u8, y: &[u8], digest: &str) -> SharePayload {
        SharePayload {
            vault_id,
            plan_version,
            threshold,
            total,
            index,
            y_b64: SharePayload::encode_y(y),
            content_digest: digest.to_string(),
            instructions: None,
        }
    }

    #[test]
    fn happy_path_reconstructs_once_threshold_responses_arrive() {
        let secret = b"a Nostr private key, roughly";
        let padded = pad(secret);
        let digest = content_digest(secret);
        let shares = split(&padded, 2, 3).unwrap();

        let pk_a = Pubkey::from_bytes([1u8; 32]);
        let pk_b = Pubkey::from_bytes([2u8; 32]);
        let pk_c = Pubkey::from_bytes([3u8; 32]);
        let mut request = sample_request(2, &[pk_a, pk_b, pk_c], None);
        mark_sent(&mut request);
        let vault_id = request.vault_id;

        let payload_a = RecoveryResponsePayload {
            recovery_request_id: request.id,
            vault_id,
            approved: true,
            shard_data: Some(share_payload(vault_id, 1, 2, 3, shares[0].index, &shares[0].y_bytes, &digest)),
            responded_at: 10,
        };
        handle_response(&mut request, vault_id, pk_a, EventId::from_bytes([11u8; 32]), &payload_a).unwrap();
        assert_eq!(request.status, RecoveryStatus::InProgress);
        assert_eq!(try_complete(&mut request).unwrap(), None);

        let payload_b = RecoveryResponsePayload {
            recovery_request_id: request.id,
            vault_id,
            approved: true,
            shard_data: Some(share_payload(vault_id, 1, 2, 3, shares[1].index, &shares[1].y_bytes, &digest)),
            responded_at: 11,
        };
        handle_response(&mut request, vault_id, pk_b, EventId::from_bytes([12u8; 32]), &payload_b).unwrap();

        let recovered = try_complete(&mut request).unwrap().unwrap();
        assert_eq!(recovered, secret);
        assert_eq!(request.status, RecoveryStatus::Completed);
    }

    #[test]
    fn shares_from_a_stale_plan_version_never_mix_with_the_current_one() {
        let secret = b"short secret";
        let padded = pad(secret);
        let digest = content_digest(secret);
        let shares = split(&padded, 2, 3).unwrap();

        let pk_a = Pubkey::from_bytes([1u8; 32]);
        let pk_b = Pubkey::from_bytes([2u8; 32]);
        let mut request = sample_request(2, &[pk_a, pk_b], None);
        let vault_id = request.vault_id;

        let stale = RecoveryResponsePayload {
            recovery_request_id: request.id,
            vault_id,
            approved: true,
            shard_data: Some(share_payload(vault_id, 0, 2, 3, shares[0].index, &shares[0].y_bytes, &digest)),
            responded_at: 10,
        };
        let current = RecoveryResponsePayload {
            recovery_request_id: request.id,
            vault_id,
            approved: true,
            shard_data: Some(share_payload(vault_id, 1, 2, 3, shares[1].index, &shares[1].y_bytes, &digest)),
            responded_at: 11,
        };
        handle_response(&mut request, vault_id, pk_a, EventId::from_bytes([1u8; 32]), &stale).unwrap();
        handle_response(&mut request, vault_id, pk_b, EventId::from_bytes([2u8; 32]), &current).unwrap();

        assert_eq!(try_complete(&mut request).unwrap(), None);
    }

    #[test]
    fn a_digest_mismatch_fails_the_request_terminally() {
        let secret = b"another secret";
        let padded = pad(secret);
        let shares = split(&padded, 2, 3).unwrap();

        let pk_a = Pubkey::from_bytes([1u8; 32]);
        let pk_b = Pubkey::from_bytes([2u8; 32]);
        let mut request = sample_request(2, &[pk_a, pk_b], None);
        let vault_id = request.vault_id;

        for (pk, share) in [(pk_a, &shares[0]), (pk_b, &shares[1])] {
            let payload = RecoveryResponsePayload {
                recovery_request_id: request.id,
                vault_id,
                approved: true,
                shard_data: Some(share_payload(vault_id, 1, 2, 3, share.index, &share.y_bytes, "0000")),
                responded_at: 10,
            };
            handle_response(&mut request, vault_id, pk, EventId::from_bytes([pk.as_bytes()[0]; 32]), &payload).unwrap();
        }

        let err = try_complete(&mut request).unwrap_err();
        assert_eq!(err, RecoveryEngineError::Failed(RecoveryFailureReason::DigestMismatch));
        assert_eq!(request.status, RecoveryStatus::Failed { reason: RecoveryFailureReason::DigestMismatch });
    }

    #[test]
    fn enough_denials_to_make_threshold_unreachable_fails_with_denied() {
        let pk_a = Pubkey::from_bytes([1u8; 32]);
        let pk_b = Pubkey::from_bytes([2u8; 32]);
        let mut request = sample_request(2, &[pk_a, pk_b], None);
        let vault_id = request.vault_id;

        let denial = RecoveryResponsePayload {
            recovery_request_id: request.id,
            vault_id,
            approved: false,
            shard_data: None,
            responded_at: 10,
        };
        handle_response(&mut request, vault_id, pk_a, EventId::from_bytes([1u8; 32]), &denial).unwrap();

        let err = try_complete(&mut request).unwrap_err();
        assert_eq!(err, RecoveryEngineError::Failed(RecoveryFailureReason::Denied));
    }

    #[test]
    fn response_from_a_pubkey_not_named_on_the_request_is_rejected() {
        let pk_a = Pubkey::from_bytes([1u8; 32]);
        let stranger = Pubkey::from_bytes([9u8; 32]);
        let mut request = sample_request(1, &[pk_a], None);
        let vault_id = request.vault_id;

        let payload = RecoveryResponsePayload {
            recovery_request_id: request.id,
            vault_id,
            approved: true,
            shard_data: None,
            responded_at: 10,
        };
        let err =
            handle_response(&mut request, vault_id, stranger, EventId::from_bytes([1u8; 32]), &payload).unwrap_err();
        assert_matches::assert_matches!(err, RecoveryEngineError::UnknownSteward);
    }

    #[test]
    fn expiry_sweep_fails_a_stale_request() {
        let pk_a = Pubkey::from_bytes([1u8; 32]);
        let mut request = sample_request(1, &[pk_a], Some(100));
        assert!(!check_expiry(&mut request, 50));
        assert!(check_expiry(&mut request, 150));
        assert_eq!(request.status, RecoveryStatus::Failed { reason: RecoveryFailureReason::Expired });
    }

    #[test]
    fn expiry_sweep_marks_unreceived_responses_as_timeout() {
        let pk_a = Pubkey::from_bytes([1u8; 32]);
        let pk_b = Pubkey::from_bytes([2u8; 32]);
        let pk_c = Pubkey::from_bytes([3u8; 32]);
        let mut request = sample_request(2, &[pk_a, pk_b, pk_c], Some(100));

        let vault_id = request.vault_id;
        let payload = RecoveryResponsePayload {
            recovery_request_id: request.id,
            vault_id,
            approved: true,
            shard_data: None,
            responded_at: 10,
        };
        handle_response(&mut request, vault_id, pk_a, EventId::from_bytes([21u8; 32]), &payload).unwrap();

        assert!(check_expiry(&mut request, 150));
        assert_eq!(request.responses.get(&pk_a).unwrap().status, ResponseStatus::Approved);
        assert_eq!(request.responses.get(&pk_b).unwrap().status, ResponseStatus::Timeout);
        assert_eq!(request.responses.get(&pk_c).unwrap().status, ResponseStatus::Timeout);
    }

    #[test]
    fn a_second_response_from_the_same_steward_is_ignored() {
        let pk_a = Pubkey::from_bytes([1u8; 32]);
        let mut request = sample_request(1, &[pk_a], None);
        let vault_id = request.vault_id;

        let first = RecoveryResponsePayload {
            recovery_request_id: request.id,
            vault_id,
            approved: false,
            shard_data: None,
            responded_at: 10,
        };
        let second = RecoveryResponsePayload { approved: true, responded_at: 20, ..first.clone() };

        handle_response(&mut request, vault_id, pk_a, EventId::from_bytes([1u8; 32]), &first).unwrap();
        handle_response(&mut request, vault_id, pk_a, EventId::from_bytes([2u8; 32]), &second).unwrap();

        assert_eq!(request.responses.get(&pk_a).unwrap().status, ResponseStatus::Denied);
    }

    #[test]
    fn cancel_is_a_no_op_once_the_request_is_already_terminal() {
        let pk_a = Pubkey::from_bytes([1u8; 32]);
        let mut request = sample_request(1, &[pk_a], None);
        request.status = RecoveryStatus::Completed;
        cancel(&mut request);
        assert_eq!(request.status, RecoveryStatus::Completed);
    }
}
