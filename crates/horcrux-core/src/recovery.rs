//! Recovery ceremony records (spec section 3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{EventId, Pubkey, RecoveryRequestId, VaultId};
use crate::share::SharePayload;
use crate::Timestamp;

/// `{id, vault_id, initiator_pubkey, requested_at, expires_at?, threshold,
/// responses, status}` (spec section 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    pub id: RecoveryRequestId,
    pub vault_id: VaultId,
    pub initiator_pubkey: Pubkey,
    pub requested_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub threshold: u8,
    pub responses: HashMap<Pubkey, RecoveryResponse>,
    pub status: RecoveryStatus,
}

impl RecoveryRequest {
    pub fn new(
        vault_id: VaultId,
        initiator_pubkey: Pubkey,
        requested_at: Timestamp,
        expires_at: Option<Timestamp>,
        threshold: u8,
        stewards: &[Pubkey],
    ) -> Self {
        let responses = stewards
            .iter()
            .map(|pk| {
                (
                    *pk,
                    RecoveryResponse {
                        status: ResponseStatus::Pending,
                        responded_at: None,
                        received_share: None,
                        event_id: None,
                    },
                )
            })
            .collect();
        Self {
            id: RecoveryRequestId::generate(),
            vault_id,
            initiator_pubkey,
            requested_at,
            expires_at,
            threshold,
            responses,
            status: RecoveryStatus::Pending,
        }
    }

    pub fn approved_count(&self) -> usize {
        self.responses
            .values()
            .filter(|r| r.status == ResponseStatus::Approved)
            .count()
    }

    pub fn denied_count(&self) -> usize {
        self.responses
            .values()
            .filter(|r| r.status == ResponseStatus::Denied)
            .count()
    }

    /// Approved shares whose `plan_version` matches `version`, per the
    /// filtering rule in spec section 4.8 ("the engine filters responses by
    /// `plan_version` before combining").
    pub fn approved_shares_for_version(&self, version: u64) -> Vec<&SharePayload> {
        self.responses
            .values()
            .filter(|r| r.status == ResponseStatus::Approved)
            .filter_map(|r| r.received_share.as_ref())
            .filter(|s| s.plan_version == version)
            .collect()
    }
}

/// `status ∈ {pending, sent, in_progress, completed, failed, cancelled}`
/// (spec section 3). `failed` carries the reason (spec section 4.8).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecoveryStatus {
    Pending,
    Sent,
    InProgress,
    Completed,
    Failed { reason: RecoveryFailureReason },
    Cancelled,
}

/// Failure modes enumerated in spec section 4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryFailureReason {
    Denied,
    Expired,
    DigestMismatch,
    InsufficientShares,
}

/// `{status, responded_at?, received_share?, event_id?}` (spec section 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryResponse {
    pub status: ResponseStatus,
    pub responded_at: Option<Timestamp>,
    pub received_share: Option<SharePayload>,
    pub event_id: Option<EventId>,
}

/// `status ∈ {pending, approved, denied, timeout}` (spec section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Pending,
    Approved,
    Denied,
    Timeout,
}
