//! Event router (C5): unwraps every gift wrap addressed to this node, drops
//! duplicates by rumor id, and dispatches the recovered rumor to whichever
//! engine owns its kind (spec section 4.5, SPEC_FULL.md C.5).

pub mod kinds;

use std::num::NonZeroUsize;

use lru::LruCache;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use horcrux_core::EventId;
use horcrux_envelope::Event;
use horcrux_identity::Identity;
use horcrux_transport::InboundEvent;

/// Large enough to absorb one gift wrap per steward per in-flight ceremony
/// without unbounded growth; shares the sizing rationale used by the
/// transport gateway's own dedup window (SPEC_FULL.md C.1, C.5).
pub const DEDUP_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no engine is registered for rumor kind {kind}")]
    UnroutableKind { kind: u16 },
}

/// One outbound channel per engine kind-bucket. An engine that isn't running
/// in this process simply leaves its sender unset; the router logs and
/// drops rumors addressed to it instead of failing the whole dispatch loop.
#[derive(Default, Clone)]
pub struct RouterChannels {
    pub distribution: Option<mpsc::UnboundedSender<Event>>,
    pub recovery_request: Option<mpsc::UnboundedSender<Event>>,
    pub recovery_response: Option<mpsc::UnboundedSender<Event>>,
    pub invitation_rsvp: Option<mpsc::UnboundedSender<Event>>,
    pub invitation_denial: Option<mpsc::UnboundedSender<Event>>,
    pub shard_confirmation: Option<mpsc::UnboundedSender<Event>>,
    pub steward_removal: Option<mpsc::UnboundedSender<Event>>,
}

impl RouterChannels {
    fn sender_for(&self, kind: u16) -> Option<&mpsc::UnboundedSender<Event>> {
        match kind {
            kinds::DISTRIBUTION_SHARD => self.distribution.as_ref(),
            kinds::RECOVERY_REQUEST => self.recovery_request.as_ref(),
            kinds::RECOVERY_RESPONSE => self.recovery_response.as_ref(),
            kinds::INVITATION_RSVP => self.invitation_rsvp.as_ref(),
            kinds::INVITATION_DENIAL => self.invitation_denial.as_ref(),
            kinds::SHARD_CONFIRMATION => self.shard_confirmation.as_ref(),
            kinds::STEWARD_REMOVAL => self.steward_removal.as_ref(),
            _ => None,
        }
    }
}

pub struct Router {
    channels: RouterChannels,
    seen_rumors: LruCache<EventId, ()>,
}

impl Router {
    pub fn new(channels: RouterChannels) -> Self {
        Self {
            channels,
            seen_rumors: LruCache::new(NonZeroUsize::new(DEDUP_CAPACITY).expect("nonzero constant")),
        }
    }

    /// Unwrap one inbound gift wrap and, if it's new and routable, hand the
    /// rumor to its engine's channel.
    pub fn handle(&mut self, identity: &Identity, inbound: &InboundEvent) -> Result<(), RouterError> {
        let rumor = match horcrux_envelope::unwrap(identity, &inbound.event) {
            Ok(rumor) => rumor,
            Err(e) => {
                debug!(relay = %inbound.relay_url, error = %e, "discarding gift wrap that did not unwrap");
                return Ok(());
            }
        };

        if self.seen_rumors.get(&rumor.id).is_some() {
            debug!(rumor_id = %rumor.id, "duplicate rumor, already dispatched");
            return Ok(());
        }
        self.seen_rumors.put(rumor.id, ());

        match self.channels.sender_for(rumor.kind) {
            Some(sender) => {
                if sender.send(rumor).is_err() {
                    warn!("engine channel closed while dispatching rumor");
                }
                Ok(())
            }
            None => Err(RouterError::UnroutableKind { kind: rumor.kind }),
        }
    }

    /// Drain a gateway's inbound stream until it closes, dispatching every
    /// rumor this node can unwrap.
    pub async fn run(&mut self, identity: &Identity, mut inbound: broadcast::Receiver<InboundEvent>) {
        loop {
            match inbound.recv().await {
                Ok(event) => {
                    if let Err(e) = self.handle(identity, &event) {
                        debug!(error = %e, "dropping unroutable rumor");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "router lagged behind the relay gateway's inbound stream");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horcrux_envelope::wrap;

    fn inbound_gift_wrap(sender: &Identity, recipient: &Identity, kind: u16) -> InboundEvent {
        let rumor = Event::rumor(sender.pubkey(), 0, kind, vec![], "{}".into());
        let gift_wrap = wrap(sender, &rumor, &recipient.pubkey()).unwrap();
        InboundEvent { relay_url: "wss://relay.example".into(), event: gift_wrap }
    }

    #[test]
    fn dispatches_a_distribution_shard_to_its_channel() {
        let sender = Identity::generate();
        let recipient = Identity::generate();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channels = RouterChannels { distribution: Some(tx), ..Default::default() };
        let mut router = Router::new(channels);

        let inbound = inbound_gift_wrap(&sender, &recipient, kinds::DISTRIBUTION_SHARD);
        router.handle(&recipient, &inbound).unwrap();

        let rumor = rx.try_recv().unwrap();
        assert_eq!(rumor.kind, kinds::DISTRIBUTION_SHARD);
    }

    #[test]
    fn duplicate_rumor_is_only_dispatched_once() {
        let sender = Identity::generate();
        let recipient = Identity::generate();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channels = RouterChannels { recovery_request: Some(tx), ..Default::default() };
        let mut router = Router::new(channels);

        let inbound = inbound_gift_wrap(&sender, &recipient, kinds::RECOVERY_REQUEST);
        router.handle(&recipient, &inbound).unwrap();
        router.handle(&recipient, &inbound).unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "second dispatch of the same rumor must be suppressed");
    }

    #[test]
    fn gift_wrap_not_addressed_to_us_is_silently_dropped() {
        let sender = Identity::generate();
        let recipient = Identity::generate();
        let bystander = Identity::generate();
        let channels = RouterChannels::default();
        let mut router = Router::new(channels);

        let inbound = inbound_gift_wrap(&sender, &recipient, kinds::DISTRIBUTION_SHARD);
        assert!(router.handle(&bystander, &inbound).is_ok());
    }

    #[test]
    fn unknown_kind_with_no_registered_engine_is_an_error() {
        let sender = Identity::generate();
        let recipient = Identity::generate();
        let channels = RouterChannels::default();
        let mut router = Router::new(channels);

        let inbound = inbound_gift_wrap(&sender, &recipient, 9999);
        let err = router.handle(&recipient, &inbound).unwrap_err();
        assert!(matches!(err, RouterError::UnroutableKind { kind: 9999 }));
    }
}
