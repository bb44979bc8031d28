//! Invitation engine (C6): the `created → pending → {redeemed, denied,
//! invalidated, error}` state machine for a single invitation (spec section
//! 4.6), plus the RSVP/denial rumor payloads it consumes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use horcrux_core::ids::{InviteCode, Pubkey, VaultId};
use horcrux_core::invitation::{Invitation, InvitationStatus};
use horcrux_core::Timestamp;

pub const RSVP_KIND: u16 = 1340;
pub const DENIAL_KIND: u16 = 1341;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvitationEngineError {
    #[error("no invitation found for code")]
    InvitationNotFound,
    #[error("invite_code was already redeemed by a different pubkey")]
    AlreadyRedeemed,
    #[error("invitation was invalidated and can no longer be redeemed")]
    InvitationInvalidated,
    #[error("rsvp/denial payload did not reference this vault")]
    VaultMismatch,
    #[error("malformed invitation payload: {0}")]
    MalformedPayload(String),
}

/// The decrypted content of a kind-1340 rumor (spec section 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsvpPayload {
    pub invite_code: String,
    pub accepted_at: Timestamp,
}

/// The decrypted content of a kind-1341 rumor (spec section 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenialPayload {
    pub invite_code: String,
    pub reason: Option<String>,
    pub denied_at: Timestamp,
}

/// Mark an invitation as published (observed going out over a relay). Idle
/// until then it sits in `created` (spec section 4.6).
pub fn mark_pending(invitation: &mut Invitation) {
    if invitation.status == InvitationStatus::Created {
        invitation.status = InvitationStatus::Pending;
    }
}

/// Owner-side handling of an inbound RSVP rumor. `redeemer_pubkey` is the
/// rumor's authorship pubkey, the only trustworthy identity in the envelope
/// (spec section 4.2). Returns the pubkey that should be written onto the
/// matching steward record.
pub fn handle_rsvp(
    invitation: &mut Invitation,
    vault_id: VaultId,
    redeemer_pubkey: Pubkey,
    payload: &RsvpPayload,
) -> Result<Pubkey, InvitationEngineError> {
    if invitation.vault_id != vault_id {
        return Err(InvitationEngineError::VaultMismatch);
    }
    validate_code(invitation, payload.invite_code.as_str())?;

    match invitation.status {
        InvitationStatus::Invalidated => Err(InvitationEngineError::InvitationInvalidated),
        InvitationStatus::Redeemed => match invitation.redeemer_pubkey {
            Some(existing) if existing == redeemer_pubkey => Ok(existing),
            _ => Err(InvitationEngineError::AlreadyRedeemed),
        },
        InvitationStatus::Created | InvitationStatus::Pending | InvitationStatus::Error => {
            invitation.status = InvitationStatus::Redeemed;
            invitation.redeemer_pubkey = Some(redeemer_pubkey);
            Ok(redeemer_pubkey)
        }
        InvitationStatus::Denied => {
            // A denial followed by an RSVP from the same party is still a
            // valid acceptance; the invitee changed their mind.
            invitation.status = InvitationStatus::Redeemed;
            invitation.redeemer_pubkey = Some(redeemer_pubkey);
            Ok(redeemer_pubkey)
        }
    }
}

/// Owner-side handling of an inbound denial rumor (spec section 4.6).
pub fn handle_denial(
    invitation: &mut Invitation,
    vault_id: VaultId,
    payload: &DenialPayload,
) -> Result<(), InvitationEngineError> {
    if invitation.vault_id != vault_id {
        return Err(InvitationEngineError::VaultMismatch);
    }
    validate_code(invitation, payload.invite_code.as_str())?;

    if invitation.status == InvitationStatus::Redeemed {
        // Already redeemed; a late denial cannot retract acceptance.
        return Ok(());
    }
    invitation.status = InvitationStatus::Denied;
    invitation.revocation_reason = payload.reason.clone();
    Ok(())
}

/// Owner explicitly revokes a link, e.g. because the steward was removed
/// before accepting (spec section 4.6). Terminal: later redemption attempts
/// fail with `InvitationInvalidated`.
pub fn invalidate(invitation: &mut Invitation, reason: impl Into<String>) {
    invitation.status = InvitationStatus::Invalidated;
    invitation.revocation_reason = Some(reason.into());
}

fn validate_code(invitation: &Invitation, code: &str) -> Result<(), InvitationEngineError> {
    let expected: &InviteCode = &invitation.invite_code;
    if expected.as_str() != code {
        return Err(InvitationEngineError::MalformedPayload(
            "rsvp/denial invite_code does not match this invitation".into(),
        ));
    }
    Ok(())
}
