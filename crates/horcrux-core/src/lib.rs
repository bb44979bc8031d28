//! Shared data model and error taxonomy for the Horcrux social-recovery vault.
//!
//! This crate has no I/O and no cryptography of its own; it is the vocabulary
//! every other `horcrux-*` crate shares: vault/plan/steward/invitation/share/
//! recovery records (spec section 3) and the error taxonomy (spec section 7).

pub mod error;
pub mod ids;
pub mod invitation;
pub mod plan;
pub mod recovery;
pub mod share;
pub mod steward;
pub mod vault;

pub use ids::{EventId, InviteCode, Pubkey, RecoveryRequestId, VaultId};
pub use invitation::{Invitation, InvitationStatus};
pub use plan::{BackupPlan, PlanStatus};
pub use recovery::{
    RecoveryFailureReason, RecoveryRequest, RecoveryResponse, RecoveryStatus, ResponseStatus,
};
pub use share::SharePayload;
pub use steward::{Steward, StewardStatus};
pub use vault::Vault;

/// Maximum number of stewards a single backup plan may name.
pub const MAX_STEWARDS: usize = 10;

/// Unix timestamp in seconds. The core has no clock of its own; callers pass
/// timestamps in explicitly (spec section 5 treats time as an effect).
pub type Timestamp = i64;
