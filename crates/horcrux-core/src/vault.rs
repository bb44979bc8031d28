//! Vault record (spec section 3).

use serde::{Deserialize, Serialize};

use crate::ids::{Pubkey, VaultId};
use crate::plan::{BackupPlan, PlanStatus};
use crate::Timestamp;

/// `{id, name, content, owner_pubkey, created_at, backup_plan?}` (spec
/// section 3). `content` is the secret blob being protected — typically a
/// Nostr private key, but opaque to this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub id: VaultId,
    pub name: String,
    pub content: Vec<u8>,
    pub owner_pubkey: Pubkey,
    pub created_at: Timestamp,
    pub backup_plan: Option<BackupPlan>,
}

impl Vault {
    pub fn new(name: impl Into<String>, content: Vec<u8>, owner_pubkey: Pubkey, created_at: Timestamp) -> Self {
        Self {
            id: VaultId::generate(),
            name: name.into(),
            content,
            owner_pubkey,
            created_at,
            backup_plan: None,
        }
    }

    /// A vault is logically frozen once its plan has been distributed: the
    /// owner should redistribute (which bumps the version) rather than edit
    /// content in place (spec section 3, "Lifecycle").
    pub fn is_frozen(&self) -> bool {
        matches!(
            self.backup_plan.as_ref().map(|p| p.status),
            Some(PlanStatus::Distributed)
        )
    }
}
