//! Node-level error taxonomy: wraps every engine's own error enum behind one
//! type via `#[from]`, the same one-`thiserror`-enum-per-bucket shape
//! `horcrux-core::error::InputError` uses for its own bucket.

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] horcrux_store::StoreError),
    #[error(transparent)]
    Envelope(#[from] horcrux_envelope::EnvelopeError),
    #[error(transparent)]
    Transport(#[from] horcrux_transport::TransportError),
    #[error(transparent)]
    Invitation(#[from] horcrux_invitation::InvitationEngineError),
    #[error(transparent)]
    Distribution(#[from] horcrux_distribution::DistributionError),
    #[error(transparent)]
    Recovery(#[from] horcrux_recovery::RecoveryEngineError),
    #[error(transparent)]
    Input(#[from] horcrux_core::error::InputError),
    #[error("malformed rumor payload: {0}")]
    MalformedPayload(String),
    #[error("vault {0} has no backup plan")]
    NoBackupPlan(horcrux_core::VaultId),
    #[error("vault not found")]
    VaultNotFound,
    #[error("invitation not found for that code")]
    InvitationNotFound,
    #[error("recovery request not found")]
    RecoveryRequestNotFound,
    #[error("confirmation referenced a different vault or a stale plan version")]
    PlanVersionMismatch,
    #[error("no engine is wired up to handle rumor kind {kind}")]
    UnroutableKind { kind: u16 },
}
