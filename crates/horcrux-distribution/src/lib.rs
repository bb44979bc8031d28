//! Distribution engine (C7): validates a backup plan, assigns Shamir
//! x-coordinates, splits the vault content, and tracks shard confirmations
//! through to `distributed` (spec section 4.7).

mod index;

pub use index::assign_indices;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use horcrux_core::ids::{EventId, Pubkey, VaultId};
use horcrux_core::plan::{BackupPlan, PlanStatus};
use horcrux_core::share::SharePayload;
use horcrux_core::steward::Steward;
use horcrux_core::Timestamp;
use horcrux_shares::{content_digest, pad, split, Share};

/// The decrypted content of a kind-1342 rumor (spec section 6), also
/// carried as an `["e", gift_wrap_event_id]` tag on the outer event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfirmationPayload {
    pub vault_id: VaultId,
    pub plan_version: u64,
    pub gift_wrap_event_id: EventId,
    pub confirmed_at: Timestamp,
}

/// The decrypted content of a kind-1345 rumor (spec section 6). Advisory
/// only (spec section 4.7): no security property depends on its delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StewardRemovalPayload {
    pub vault_id: VaultId,
    pub removed_at: Timestamp,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DistributionError {
    #[error("plan is invalid: {0}")]
    InvalidPlan(String),
    #[error("share codec rejected the split: {0}")]
    ShareCodec(String),
    #[error("no steward is confirming with gift-wrap event id {gift_wrap_event_id}")]
    UnknownConfirmation { gift_wrap_event_id: EventId },
}

/// One outgoing shard, paired with the steward it's addressed to.
pub struct ShardDelivery {
    pub steward_pubkey: Pubkey,
    pub payload: SharePayload,
}

/// Validate the plan, assign any missing steward indices, split `content`,
/// and build the per-steward wire payloads (spec section 4.7, steps 1-4).
/// Does not publish anything — that's the node composition root's job, once
/// it has wrapped each payload as a kind-1337 rumor.
pub fn prepare_distribution(
    vault_id: VaultId,
    plan: &mut BackupPlan,
    content: &[u8],
) -> Result<Vec<ShardDelivery>, DistributionError> {
    plan.validate().map_err(DistributionError::InvalidPlan)?;
    if !plan.all_accepted() {
        return Err(DistributionError::InvalidPlan(
            "every steward must be accepted before distribution".into(),
        ));
    }

    assign_indices(&mut plan.stewards);

    let digest = content_digest(content);
    let padded = pad(content);
    let total = plan.stewards.len() as u8;
    let shares = split(&padded, plan.threshold, total).map_err(|e| DistributionError::ShareCodec(e.to_string()))?;

    let shares_by_index: std::collections::HashMap<u8, Share> =
        shares.into_iter().map(|s| (s.index, s)).collect();

    plan.stewards
        .iter()
        .map(|steward| {
            let index = steward.assigned_index.expect("assign_indices ran above");
            let share = shares_by_index
                .get(&index)
                .ok_or_else(|| DistributionError::ShareCodec(format!("no share generated for index {index}")))?;
            let pubkey = steward
                .pubkey()
                .ok_or_else(|| DistributionError::InvalidPlan("accepted steward missing pubkey".into()))?;
            Ok(ShardDelivery {
                steward_pubkey: pubkey,
                payload: SharePayload {
                    vault_id,
                    plan_version: plan.version,
                    threshold: plan.threshold,
                    total,
                    index,
                    y_b64: SharePayload::encode_y(&share.y_bytes),
                    content_digest: digest.clone(),
                    instructions: plan.instructions.clone(),
                },
            })
        })
        .collect()
}

/// Record a kind-1342 shard-confirmation event. First confirmation for a
/// given gift-wrap event id wins; later ones are a no-op (spec section 4.7's
/// tie-breaking rule).
pub fn handle_confirmation(
    plan: &mut BackupPlan,
    gift_wrap_event_id: EventId,
    confirmed_at: Timestamp,
) -> Result<(), DistributionError> {
    let steward = plan
        .stewards
        .iter_mut()
        .find(|s| s.gift_wrap_event_id == Some(gift_wrap_event_id))
        .ok_or(DistributionError::UnknownConfirmation { gift_wrap_event_id })?;

    if steward.confirmation_at.is_none() {
        steward.confirmation_at = Some(confirmed_at);
    }

    if plan.status == PlanStatus::Ready && all_confirmed_or_not_required(plan) {
        plan.status = PlanStatus::Distributed;
        plan.last_distributed_at = Some(confirmed_at);
    }
    Ok(())
}

fn all_confirmed_or_not_required(plan: &BackupPlan) -> bool {
    !plan.require_confirmations || plan.stewards.iter().all(|s| s.confirmation_at.is_some())
}

/// Steward removal (spec section 4.7): the plan version bumps, the
/// steward's share is considered stale, and a kind-1345 event should be sent
/// to it advisory-only (the node composition root handles the actual send).
pub fn remove_steward(plan: &mut BackupPlan, pubkey: Pubkey) {
    for steward in &mut plan.stewards {
        if steward.pubkey() == Some(pubkey) {
            steward.remove();
        }
    }
    plan.bump_version();
}

#[cfg(test)]
mod tests {
    use super::*;
    use horcrux_core::steward::StewardStatus;

    fn accepted_steward(index: Option<u8>) -> Steward {
        let mut s = Steward::invited("steward", "code");
        s.accept(Pubkey::from_bytes([7u8; 32]));
        s.assigned_index = index;
        s
    }

    #[test]
    fn prepare_distribution_assigns_indices_and_builds_one_payload_per_steward() {
        let mut plan = BackupPlan::new(
            2,
            vec![accepted_steward(None), accepted_steward(None), accepted_steward(None)],
            vec!["wss://relay.example".into()],
        );
        // Distinguish stewards by pubkey so the confirmation map stays sane.
        plan.stewards[0].accept(Pubkey::from_bytes([1u8; 32]));
        plan.stewards[1].accept(Pubkey::from_bytes([2u8; 32]));
        plan.stewards[2].accept(Pubkey::from_bytes([3u8; 32]));

        let deliveries = prepare_distribution(VaultId::generate(), &mut plan, b"hunter2").unwrap();
        assert_eq!(deliveries.len(), 3);
        let indices: std::collections::HashSet<u8> =
            plan.stewards.iter().map(|s| s.assigned_index.unwrap()).collect();
        assert_eq!(indices, [1u8, 2, 3].into_iter().collect());
    }

    #[test]
    fn prepare_distribution_rejects_plan_with_unaccepted_steward() {
        let mut plan = BackupPlan::new(1, vec![Steward::invited("pending", "code")], vec!["wss://relay".into()]);
        let err = prepare_distribution(VaultId::generate(), &mut plan, b"secret").unwrap_err();
        assert_matches::assert_matches!(err, DistributionError::InvalidPlan(_));
    }

    #[test]
    fn confirmation_is_idempotent_first_wins() {
        let mut plan = BackupPlan::new(1, vec![accepted_steward(Some(1))], vec!["wss://relay".into()]);
        plan.status = PlanStatus::Ready;
        plan.stewards[0].gift_wrap_event_id = Some(EventId::from_bytes([9u8; 32]));

        handle_confirmation(&mut plan, EventId::from_bytes([9u8; 32]), 100).unwrap();
        handle_confirmation(&mut plan, EventId::from_bytes([9u8; 32]), 200).unwrap();

        assert_eq!(plan.stewards[0].confirmation_at, Some(100));
    }

    #[test]
    fn plan_becomes_distributed_once_every_steward_confirms() {
        let mut plan = BackupPlan::new(1, vec![accepted_steward(Some(1))], vec!["wss://relay".into()]);
        plan.status = PlanStatus::Ready;
        plan.stewards[0].gift_wrap_event_id = Some(EventId::from_bytes([9u8; 32]));

        handle_confirmation(&mut plan, EventId::from_bytes([9u8; 32]), 100).unwrap();
        assert_eq!(plan.status, PlanStatus::Distributed);
    }

    #[test]
    fn removing_a_steward_bumps_version_and_marks_it_removed() {
        let mut plan = BackupPlan::new(1, vec![accepted_steward(Some(1))], vec!["wss://relay".into()]);
        let pubkey = plan.stewards[0].pubkey().unwrap();
        remove_steward(&mut plan, pubkey);
        assert_eq!(plan.version, 2);
        assert!(matches!(plan.stewards[0].status, StewardStatus::Removed));
    }
}
