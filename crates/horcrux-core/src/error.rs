//! Input-validation error bucket (spec section 7) shared by every
//! `horcrux-core` type that parses or constructs itself from untrusted
//! input (ids, invitation links, share payloads). Each engine crate
//! (`horcrux-envelope`, `-transport`, `-store`, `-recovery`, `-distribution`,
//! `-invitation`) owns its own independent error enum for its own protocol
//! failures; `horcrux-node::NodeError` is what unifies those at the root via
//! `#[from]`, not this crate.

use thiserror::Error;

/// Errors raised by user-supplied input or configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("invalid key: {message}")]
    InvalidKey { message: String },
    #[error("invalid bech32: {message}")]
    InvalidBech32 { message: String },
    #[error("invalid invitation code: {message}")]
    InvalidInvitationCode { message: String },
    #[error("invalid relay url: {message}")]
    InvalidRelayUrl { message: String },
    #[error("validation failure: {message}")]
    ValidationFailure { message: String },
}
