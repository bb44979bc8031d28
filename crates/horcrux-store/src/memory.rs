//! An in-memory [`VaultStore`] implementation. Each record type gets its own
//! mutex so a write to one doesn't block a read of another, while each
//! individual operation remains atomic (lock held for the whole critical
//! section).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

use horcrux_core::{
    Invitation, InvitationStatus, Pubkey, RecoveryRequest, RecoveryRequestId, RecoveryResponse,
    SharePayload, Vault, VaultId,
};

use crate::{ChangeEvent, StoreError, VaultStore};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A poisoned mutex means some prior operation panicked mid-write; that's
/// worth a log even though the caller already gets it back as an `Err`.
fn poisoned(what: &str) -> StoreError {
    warn!(what, "store mutex poisoned by a prior panic");
    StoreError::StoreUnavailable(format!("{what} lock poisoned"))
}

pub struct MemoryStore {
    vaults: Mutex<HashMap<VaultId, Vault>>,
    received_shares: Mutex<HashMap<VaultId, SharePayload>>,
    invitations: Mutex<HashMap<String, Invitation>>,
    recovery_requests: Mutex<HashMap<RecoveryRequestId, RecoveryRequest>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            vaults: Mutex::new(HashMap::new()),
            received_shares: Mutex::new(HashMap::new()),
            invitations: Mutex::new(HashMap::new()),
            recovery_requests: Mutex::new(HashMap::new()),
            changes,
        }
    }

    fn notify(&self, event: ChangeEvent) {
        // No active subscribers is not an error; the write already committed.
        let _ = self.changes.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VaultStore for MemoryStore {
    async fn put_vault(&self, vault: Vault) -> Result<(), StoreError> {
        let id = vault.id;
        self.vaults
            .lock()
            .map_err(|_| poisoned("vault store"))?
            .insert(id, vault);
        self.notify(ChangeEvent::VaultChanged(id));
        Ok(())
    }

    async fn get_vault(&self, id: VaultId) -> Result<Option<Vault>, StoreError> {
        Ok(self
            .vaults
            .lock()
            .map_err(|_| poisoned("vault store"))?
            .get(&id)
            .cloned())
    }

    async fn list_vaults(&self) -> Result<Vec<Vault>, StoreError> {
        Ok(self
            .vaults
            .lock()
            .map_err(|_| poisoned("vault store"))?
            .values()
            .cloned()
            .collect())
    }

    async fn delete_vault(&self, id: VaultId) -> Result<(), StoreError> {
        self.vaults
            .lock()
            .map_err(|_| poisoned("vault store"))?
            .remove(&id);
        self.notify(ChangeEvent::VaultDeleted(id));
        Ok(())
    }

    async fn put_received_share(&self, vault_id: VaultId, share: SharePayload) -> Result<(), StoreError> {
        self.received_shares
            .lock()
            .map_err(|_| poisoned("share store"))?
            .insert(vault_id, share);
        self.notify(ChangeEvent::ReceivedShareChanged(vault_id));
        Ok(())
    }

    async fn get_received_share(&self, vault_id: VaultId) -> Result<Option<SharePayload>, StoreError> {
        Ok(self
            .received_shares
            .lock()
            .map_err(|_| poisoned("share store"))?
            .get(&vault_id)
            .cloned())
    }

    async fn delete_received_share(&self, vault_id: VaultId) -> Result<(), StoreError> {
        self.received_shares
            .lock()
            .map_err(|_| poisoned("share store"))?
            .remove(&vault_id);
        self.notify(ChangeEvent::ReceivedShareDeleted(vault_id));
        Ok(())
    }

    async fn put_invitation(&self, invitation: Invitation) -> Result<(), StoreError> {
        let code = invitation.invite_code.as_str().to_string();
        self.invitations
            .lock()
            .map_err(|_| poisoned("invitation store"))?
            .insert(code.clone(), invitation);
        self.notify(ChangeEvent::InvitationChanged(code));
        Ok(())
    }

    async fn find_invitation_by_code(&self, code: &str) -> Result<Option<Invitation>, StoreError> {
        Ok(self
            .invitations
            .lock()
            .map_err(|_| poisoned("invitation store"))?
            .get(code)
            .cloned())
    }

    async fn list_pending_invitations(&self, vault_id: VaultId) -> Result<Vec<Invitation>, StoreError> {
        Ok(self
            .invitations
            .lock()
            .map_err(|_| poisoned("invitation store"))?
            .values()
            .filter(|inv| {
                inv.vault_id == vault_id
                    && matches!(inv.status, InvitationStatus::Created | InvitationStatus::Pending)
            })
            .cloned()
            .collect())
    }

    async fn put_recovery_request(&self, request: RecoveryRequest) -> Result<(), StoreError> {
        let id = request.id;
        self.recovery_requests
            .lock()
            .map_err(|_| poisoned("recovery store"))?
            .insert(id, request);
        self.notify(ChangeEvent::RecoveryRequestChanged(id));
        Ok(())
    }

    async fn get_recovery_request(&self, id: RecoveryRequestId) -> Result<Option<RecoveryRequest>, StoreError> {
        Ok(self
            .recovery_requests
            .lock()
            .map_err(|_| poisoned("recovery store"))?
            .get(&id)
            .cloned())
    }

    async fn list_recovery_requests(&self) -> Result<Vec<RecoveryRequest>, StoreError> {
        Ok(self
            .recovery_requests
            .lock()
            .map_err(|_| poisoned("recovery store"))?
            .values()
            .cloned()
            .collect())
    }

    async fn upsert_response(
        &self,
        request_id: RecoveryRequestId,
        steward_pubkey: Pubkey,
        response: RecoveryResponse,
    ) -> Result<(), StoreError> {
        let mut requests = self
            .recovery_requests
            .lock()
            .map_err(|_| poisoned("recovery store"))?;
        let request = requests.get_mut(&request_id).ok_or(StoreError::NotFound)?;
        request.responses.insert(steward_pubkey, response);
        drop(requests);
        self.notify(ChangeEvent::RecoveryRequestChanged(request_id));
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        self.vaults
            .lock()
            .map_err(|_| poisoned("vault store"))?
            .clear();
        self.received_shares
            .lock()
            .map_err(|_| poisoned("share store"))?
            .clear();
        self.invitations
            .lock()
            .map_err(|_| poisoned("invitation store"))?
            .clear();
        self.recovery_requests
            .lock()
            .map_err(|_| poisoned("recovery store"))?
            .clear();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horcrux_core::Pubkey;

    fn sample_vault() -> Vault {
        Vault::new("test", b"secret".to_vec(), Pubkey::from_bytes([1u8; 32]), 0)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        let vault = sample_vault();
        let id = vault.id;
        store.put_vault(vault.clone()).await.unwrap();
        assert_eq!(store.get_vault(id).await.unwrap(), Some(vault));
    }

    #[tokio::test]
    async fn put_emits_exactly_one_change_notification() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        let vault = sample_vault();
        let id = vault.id;
        store.put_vault(vault).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ChangeEvent::VaultChanged(id));
        assert!(rx.try_recv().is_err(), "no second notification for one write");
    }

    #[tokio::test]
    async fn delete_then_get_returns_none() {
        let store = MemoryStore::new();
        let vault = sample_vault();
        let id = vault.id;
        store.put_vault(vault).await.unwrap();
        store.delete_vault(id).await.unwrap();
        assert_eq!(store.get_vault(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_all_empties_every_collection() {
        let store = MemoryStore::new();
        store.put_vault(sample_vault()).await.unwrap();
        store.clear_all().await.unwrap();
        assert!(store.list_vaults().await.unwrap().is_empty());
    }
}
