//! Steward records (spec section 3).
//!
//! The source's null-conditional "maybe has a pubkey, maybe has an invite
//! code" modeling is replaced with a sum type per spec section 9's design
//! note, so a steward that hasn't redeemed its invitation cannot even be
//! constructed holding a pubkey.

use serde::{Deserialize, Serialize};

use crate::ids::{EventId, Pubkey};
use crate::Timestamp;

/// A trusted third party holding (or invited to hold) one share of a vault's
/// secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Steward {
    pub name: String,
    pub status: StewardStatus,
    /// The Shamir x-coordinate, assigned on first distribution and stable
    /// across redistributions for this steward (spec section 3).
    pub assigned_index: Option<u8>,
    pub gift_wrap_event_id: Option<EventId>,
    pub confirmation_at: Option<Timestamp>,
}

impl Steward {
    pub fn invited(name: impl Into<String>, invite_code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StewardStatus::Invited {
                invite_code: invite_code.into(),
            },
            assigned_index: None,
            gift_wrap_event_id: None,
            confirmation_at: None,
        }
    }

    pub fn pubkey(&self) -> Option<Pubkey> {
        match self.status {
            StewardStatus::Accepted { pubkey } => Some(pubkey),
            _ => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.status, StewardStatus::Accepted { .. })
    }

    /// Transition an invited steward to accepted once its invitation code
    /// has been redeemed by `pubkey`. No-op-safe to call on an already
    /// accepted steward representing the same pubkey (idempotent per spec
    /// section 4.6's invariant).
    pub fn accept(&mut self, pubkey: Pubkey) {
        self.status = StewardStatus::Accepted { pubkey };
    }

    pub fn remove(&mut self) {
        self.status = StewardStatus::Removed;
    }
}

/// `Steward = Invited{code} | Accepted{pubkey} | Removed` (spec section 9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StewardStatus {
    Invited { invite_code: String },
    Accepted { pubkey: Pubkey },
    Removed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invited_steward_has_no_pubkey() {
        let s = Steward::invited("alice", "abc");
        assert_eq!(s.pubkey(), None);
        assert!(!s.is_accepted());
    }

    #[test]
    fn accepting_sets_pubkey() {
        let mut s = Steward::invited("alice", "abc");
        let pk = Pubkey::from_bytes([7u8; 32]);
        s.accept(pk);
        assert!(s.is_accepted());
        assert_eq!(s.pubkey(), Some(pk));
    }
}
