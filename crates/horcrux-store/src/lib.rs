//! Vault store contract (C9): a persistence interface, not a specific
//! implementation (spec section 4.9). The core only depends on the trait in
//! this crate; [`memory::MemoryStore`] exists so engines and their tests can
//! run against a real implementation without pulling in a platform-specific
//! encrypted key-value store (out of scope per spec section 1).

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use horcrux_core::{
    Invitation, Pubkey, RecoveryRequest, RecoveryRequestId, RecoveryResponse, SharePayload, Vault,
    VaultId,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("not found")]
    NotFound,
    #[error("conflicting concurrent write: {0}")]
    Conflict(String),
}

/// A single committed change, emitted exactly once per write (spec section
/// 4.9's "Atomicity requirement"). The UI (out of scope here) subscribes to
/// these instead of polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    VaultChanged(VaultId),
    VaultDeleted(VaultId),
    ReceivedShareChanged(VaultId),
    ReceivedShareDeleted(VaultId),
    InvitationChanged(String),
    RecoveryRequestChanged(RecoveryRequestId),
}

/// Persistence operations required by the engines (spec section 4.9).
/// Every operation must appear atomic to concurrent observers; a batched
/// update inside one engine step is all-or-nothing.
#[async_trait]
pub trait VaultStore: Send + Sync {
    async fn put_vault(&self, vault: Vault) -> Result<(), StoreError>;
    async fn get_vault(&self, id: VaultId) -> Result<Option<Vault>, StoreError>;
    async fn list_vaults(&self) -> Result<Vec<Vault>, StoreError>;
    async fn delete_vault(&self, id: VaultId) -> Result<(), StoreError>;

    async fn put_received_share(&self, vault_id: VaultId, share: SharePayload) -> Result<(), StoreError>;
    async fn get_received_share(&self, vault_id: VaultId) -> Result<Option<SharePayload>, StoreError>;
    async fn delete_received_share(&self, vault_id: VaultId) -> Result<(), StoreError>;

    async fn put_invitation(&self, invitation: Invitation) -> Result<(), StoreError>;
    async fn find_invitation_by_code(&self, code: &str) -> Result<Option<Invitation>, StoreError>;
    async fn list_pending_invitations(&self, vault_id: VaultId) -> Result<Vec<Invitation>, StoreError>;

    async fn put_recovery_request(&self, request: RecoveryRequest) -> Result<(), StoreError>;
    async fn get_recovery_request(&self, id: RecoveryRequestId) -> Result<Option<RecoveryRequest>, StoreError>;
    async fn list_recovery_requests(&self) -> Result<Vec<RecoveryRequest>, StoreError>;
    async fn upsert_response(
        &self,
        request_id: RecoveryRequestId,
        steward_pubkey: Pubkey,
        response: RecoveryResponse,
    ) -> Result<(), StoreError>;

    async fn clear_all(&self) -> Result<(), StoreError>;

    /// Subscribe to committed-write notifications (spec section 4.9).
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChangeEvent>;
}
