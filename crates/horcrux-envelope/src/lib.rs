//! Envelope codec (C2): build, sign, encrypt, and unwrap the three-layer
//! rumor/seal/gift-wrap structure (spec section 4.2).

pub mod nip44;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use horcrux_core::{EventId, Pubkey};
use horcrux_identity::{sha256, EphemeralIdentity, Identity};

pub const SEAL_KIND: u16 = 13;
pub const GIFT_WRAP_KIND: u16 = 1059;

/// Seven days, the `["expiration", ...]` tag lifetime every outgoing
/// application event carries (spec section 4.2, NIP-40).
pub const EXPIRATION_SECS: i64 = 7 * 24 * 60 * 60;

/// Two days: the window gift-wrap/seal `created_at` timestamps are
/// randomized within (spec section 4.2).
const TIMESTAMP_JITTER_SECS: i64 = 48 * 60 * 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("gift wrap is not addressed to this recipient")]
    NotForMe,
    #[error("failed to decrypt envelope layer")]
    DecryptFail,
    #[error("seal's outer pubkey does not match the rumor's authorship pubkey")]
    SealSenderMismatch,
}

/// A Nostr event: `{id, pubkey, created_at, kind, tags, content, sig}`
/// (spec section 4.2). `sig` is `None` for an unsigned rumor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: Pubkey,
    pub created_at: i64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: Option<String>,
}

impl Event {
    /// Construct and sign an event authored by `identity`.
    pub fn signed(
        identity: &Identity,
        created_at: i64,
        kind: u16,
        tags: Vec<Vec<String>>,
        content: String,
    ) -> Self {
        let pubkey = identity.pubkey();
        let id = compute_id(&pubkey, created_at, kind, &tags, &content);
        let sig = identity.sign(id.as_bytes());
        Self {
            id,
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig: Some(hex::encode(sig)),
        }
    }

    /// Construct an unsigned rumor: an application-kind event authored by the
    /// real sender, `id` computed but no `sig` attached (spec section 4.2).
    pub fn rumor(
        author_pubkey: Pubkey,
        created_at: i64,
        kind: u16,
        tags: Vec<Vec<String>>,
        content: String,
    ) -> Self {
        let id = compute_id(&author_pubkey, created_at, kind, &tags, &content);
        Self {
            id,
            pubkey: author_pubkey,
            created_at,
            kind,
            tags,
            content,
            sig: None,
        }
    }

    pub fn tag_values<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(key))
            .filter_map(|t| t.get(1).map(String::as_str))
    }

    /// The `["expiration", unix_ts]` tag set 7 days from `created_at` (spec
    /// section 4.2, NIP-40). All outgoing application events carry one.
    pub fn expiration_tag(created_at: i64) -> Vec<String> {
        vec!["expiration".into(), (created_at + EXPIRATION_SECS).to_string()]
    }
}

fn compute_id(pubkey: &Pubkey, created_at: i64, kind: u16, tags: &[Vec<String>], content: &str) -> EventId {
    let canonical = serde_json::json!([0, pubkey.to_hex(), created_at, kind, tags, content]);
    let bytes = serde_json::to_vec(&canonical).expect("arrays of primitives always serialize");
    EventId::from_bytes(sha256(&bytes))
}

fn jittered_timestamp(base: i64) -> i64 {
    let offset = rand::random::<u32>() as i64 % TIMESTAMP_JITTER_SECS;
    base - offset
}

/// Build the rumor→seal→gift-wrap chain addressed to `recipient` (spec
/// section 4.2). `rumor` must already carry its application-specific kind
/// and content; this only adds the encryption layers.
pub fn wrap(identity: &Identity, rumor: &Event, recipient: &Pubkey) -> Result<Event, EnvelopeError> {
    let rumor_json =
        serde_json::to_string(rumor).map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))?;

    let seal_shared = identity
        .ecdh(recipient)
        .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))?;
    let seal_content = nip44::encrypt(&seal_shared, rumor_json.as_bytes());
    let seal = Event::signed(
        identity,
        jittered_timestamp(rumor.created_at),
        SEAL_KIND,
        vec![],
        seal_content,
    );

    let seal_json =
        serde_json::to_string(&seal).map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))?;

    let ephemeral = EphemeralIdentity::generate();
    let wrap_shared = ephemeral
        .ecdh(recipient)
        .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))?;
    let wrap_content = nip44::encrypt(&wrap_shared, seal_json.as_bytes());

    let gift_created_at = jittered_timestamp(rumor.created_at);
    let tags = vec![
        vec!["p".to_string(), recipient.to_hex()],
        Event::expiration_tag(gift_created_at),
    ];
    let gift_id = compute_id(&ephemeral.pubkey(), gift_created_at, GIFT_WRAP_KIND, &tags, &wrap_content);
    let gift_sig = ephemeral.sign(gift_id.as_bytes());

    Ok(Event {
        id: gift_id,
        pubkey: ephemeral.pubkey(),
        created_at: gift_created_at,
        kind: GIFT_WRAP_KIND,
        tags,
        content: wrap_content,
        sig: Some(hex::encode(gift_sig)),
    })
}

/// Unwrap a gift-wrap event addressed to `identity`, returning the inner
/// rumor. Fails closed on any layer mismatch (spec section 4.2).
///
/// The returned rumor's `pubkey` is the only trustworthy authorship
/// indicator; the gift wrap's own `pubkey` is ephemeral and must never be
/// treated as the sender.
pub fn unwrap(identity: &Identity, gift_wrap: &Event) -> Result<Event, EnvelopeError> {
    if gift_wrap.kind != GIFT_WRAP_KIND {
        return Err(EnvelopeError::MalformedEnvelope("not a gift-wrap kind".into()));
    }
    let addressed_to_me = gift_wrap
        .tag_values("p")
        .any(|p| p == identity.pubkey_hex());
    if !addressed_to_me {
        return Err(EnvelopeError::NotForMe);
    }

    let wrap_shared = identity
        .ecdh(&gift_wrap.pubkey)
        .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))?;
    let seal_json = nip44::decrypt(&wrap_shared, &gift_wrap.content).map_err(|_| EnvelopeError::DecryptFail)?;
    let seal: Event =
        serde_json::from_slice(&seal_json).map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))?;

    let seal_shared = identity
        .ecdh(&seal.pubkey)
        .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))?;
    let rumor_json = nip44::decrypt(&seal_shared, &seal.content).map_err(|_| EnvelopeError::DecryptFail)?;
    let rumor: Event =
        serde_json::from_slice(&rumor_json).map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))?;

    if seal.pubkey != rumor.pubkey {
        return Err(EnvelopeError::SealSenderMismatch);
    }

    Ok(rumor)
}
