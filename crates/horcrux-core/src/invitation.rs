//! Invitation record (spec section 3) and link parsing (spec section 6,
//! SPEC_FULL.md section C.2).

use serde::{Deserialize, Serialize};

use crate::error::InputError;
use crate::ids::{InviteCode, Pubkey, VaultId};
use crate::Timestamp;

/// `{invite_code, vault_id, owner_pubkey, invitee_name, relay_urls (≤3),
/// created_at, status, redeemer_pubkey?, revocation_reason?}` (spec section
/// 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub invite_code: InviteCode,
    pub vault_id: VaultId,
    pub owner_pubkey: Pubkey,
    pub invitee_name: String,
    pub relay_urls: Vec<String>,
    pub created_at: Timestamp,
    pub status: InvitationStatus,
    pub redeemer_pubkey: Option<Pubkey>,
    pub revocation_reason: Option<String>,
}

impl Invitation {
    pub fn new(
        vault_id: VaultId,
        owner_pubkey: Pubkey,
        invitee_name: impl Into<String>,
        relay_urls: Vec<String>,
        created_at: Timestamp,
    ) -> Result<Self, InputError> {
        if relay_urls.is_empty() || relay_urls.len() > 3 {
            return Err(InputError::InvalidRelayUrl {
                message: "invitation must carry between 1 and 3 relay urls".into(),
            });
        }
        Ok(Self {
            invite_code: InviteCode::generate(),
            vault_id,
            owner_pubkey,
            invitee_name: invitee_name.into(),
            relay_urls,
            created_at,
            status: InvitationStatus::Created,
            redeemer_pubkey: None,
            revocation_reason: None,
        })
    }
}

/// `status ∈ {created, pending, redeemed, denied, invalidated, error}`
/// (spec section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Created,
    Pending,
    Redeemed,
    Denied,
    Invalidated,
    Error,
}

/// `https://<host>/invite/<code>?r=<relay1>&r=<relay2>&r=<relay3>` (spec
/// section 6), modeled as its own pure type so construction and parsing are
/// independently testable (SPEC_FULL.md section C.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationLink {
    pub host: String,
    pub invite_code: String,
    pub relays: Vec<String>,
}

impl InvitationLink {
    pub fn build(&self) -> String {
        let mut url = format!("{}/invite/{}", self.host.trim_end_matches('/'), self.invite_code);
        for (i, relay) in self.relays.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            url.push(sep);
            url.push_str("r=");
            url.push_str(&urlencode(relay));
        }
        url
    }

    /// Parse under a generic URL parser; unknown query parameters are
    /// ignored (spec section 6).
    pub fn parse(raw: &str) -> Result<Self, InputError> {
        let parsed = url::Url::parse(raw).map_err(|e| InputError::ValidationFailure {
            message: format!("invalid invitation url: {e}"),
        })?;
        let invite_code = parsed
            .path_segments()
            .and_then(|mut segs| {
                let first = segs.next()?;
                if first != "invite" {
                    return None;
                }
                segs.next()
            })
            .ok_or_else(|| InputError::ValidationFailure {
                message: "invitation url missing /invite/<code> path".into(),
            })?
            .to_string();
        let relays: Vec<String> = parsed
            .query_pairs()
            .filter(|(k, _)| k == "r")
            .map(|(_, v)| v.into_owned())
            .collect();
        if relays.is_empty() || relays.len() > 3 {
            return Err(InputError::ValidationFailure {
                message: "invitation url must carry between 1 and 3 relay query params".into(),
            });
        }
        let host = format!(
            "{}://{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default()
        );
        Ok(Self {
            host,
            invite_code,
            relays,
        })
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_round_trips() {
        let link = InvitationLink {
            host: "https://horcrux.example".into(),
            invite_code: "abc123deadbeef".into(),
            relays: vec!["wss://relay.one".into(), "wss://relay.two".into()],
        };
        let built = link.build();
        let parsed = InvitationLink::parse(&built).unwrap();
        assert_eq!(parsed.invite_code, link.invite_code);
        assert_eq!(parsed.relays, link.relays);
    }

    #[test]
    fn parse_ignores_unknown_query_params() {
        let parsed =
            InvitationLink::parse("https://horcrux.example/invite/abc?r=wss://relay&utm=1").unwrap();
        assert_eq!(parsed.invite_code, "abc");
        assert_eq!(parsed.relays, vec!["wss://relay".to_string()]);
    }

    #[test]
    fn parse_rejects_more_than_three_relays() {
        let url = "https://h/invite/a?r=1&r=2&r=3&r=4";
        assert!(InvitationLink::parse(url).is_err());
    }
}
