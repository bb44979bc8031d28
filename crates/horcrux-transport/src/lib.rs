//! Relay gateway (C4): owns the WebSocket connections to a node's configured
//! relays, publishes gift-wrapped events, and multiplexes incoming events
//! into a single deduplicated stream (spec section 4.4, SPEC_FULL.md C.1).

mod connection;
mod dedup;

pub use connection::{RelayConnection, RelayStatus};
pub use dedup::EventDedup;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tracing::warn;

use horcrux_envelope::Event;

/// Subscriptions and publishes are addressed by relay URL.
pub type RelayUrl = String;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("relay {url} is unreachable")]
    RelayUnreachable { url: RelayUrl },
    #[error("every configured relay failed")]
    AllRelaysFailed,
    #[error("subscription lost: {message}")]
    SubscriptionLost { message: String },
}

/// The wire messages a relay gateway exchanges with a relay (NIP-01): each
/// variant is a JSON array led by a string tag, e.g. `["REQ", "sub0", {...}]`,
/// not a tagged object — so these carry hand-written `Serialize`/
/// `Deserialize` impls rather than `#[derive]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Event(Box<Event>),
    Req { subscription_id: String, filters: Vec<Filter> },
    Close { subscription_id: String },
}

impl serde::Serialize for ClientMessage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        match self {
            ClientMessage::Event(event) => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("EVENT")?;
                seq.serialize_element(event)?;
                seq.end()
            }
            ClientMessage::Req { subscription_id, filters } => {
                let mut seq = serializer.serialize_seq(Some(2 + filters.len()))?;
                seq.serialize_element("REQ")?;
                seq.serialize_element(subscription_id)?;
                for filter in filters {
                    seq.serialize_element(filter)?;
                }
                seq.end()
            }
            ClientMessage::Close { subscription_id } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("CLOSE")?;
                seq.serialize_element(subscription_id)?;
                seq.end()
            }
        }
    }
}

impl<'de> serde::Deserialize<'de> for ClientMessage {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Vec<serde_json::Value> = serde::Deserialize::deserialize(deserializer)?;
        parse_tagged_array(raw).map_err(serde::de::Error::custom)
    }
}

fn parse_tagged_array(mut raw: Vec<serde_json::Value>) -> Result<ClientMessage, String> {
    if raw.is_empty() {
        return Err("empty relay message".into());
    }
    let tag = raw.remove(0);
    let tag = tag.as_str().ok_or("message tag must be a string")?.to_string();
    match tag.as_str() {
        "EVENT" => {
            let event = raw.into_iter().next().ok_or("EVENT missing payload")?;
            let event: Event = serde_json::from_value(event).map_err(|e| e.to_string())?;
            Ok(ClientMessage::Event(Box::new(event)))
        }
        "REQ" => {
            let mut iter = raw.into_iter();
            let subscription_id = iter
                .next()
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or("REQ missing subscription id")?;
            let filters = iter
                .map(|v| serde_json::from_value(v).map_err(|e| e.to_string()))
                .collect::<Result<Vec<Filter>, String>>()?;
            Ok(ClientMessage::Req { subscription_id, filters })
        }
        "CLOSE" => {
            let subscription_id = raw
                .into_iter()
                .next()
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or("CLOSE missing subscription id")?;
            Ok(ClientMessage::Close { subscription_id })
        }
        other => Err(format!("unrecognized client message tag {other}")),
    }
}

/// A minimal NIP-01 filter: the gateway only ever needs author/kind/tag
/// filtering, never full-text search.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(rename = "#p", skip_serializing_if = "Option::is_none")]
    pub p_tag: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
}

/// Relay → client direction of the same NIP-01 framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Event { subscription_id: String, event: Box<Event> },
    Ok { event_id: String, accepted: bool, message: String },
    Eose { subscription_id: String },
    Notice { message: String },
    Closed { subscription_id: String, message: String },
}

impl serde::Serialize for RelayMessage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        match self {
            RelayMessage::Event { subscription_id, event } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("EVENT")?;
                seq.serialize_element(subscription_id)?;
                seq.serialize_element(event)?;
                seq.end()
            }
            RelayMessage::Ok { event_id, accepted, message } => {
                let mut seq = serializer.serialize_seq(Some(4))?;
                seq.serialize_element("OK")?;
                seq.serialize_element(event_id)?;
                seq.serialize_element(accepted)?;
                seq.serialize_element(message)?;
                seq.end()
            }
            RelayMessage::Eose { subscription_id } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("EOSE")?;
                seq.serialize_element(subscription_id)?;
                seq.end()
            }
            RelayMessage::Notice { message } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("NOTICE")?;
                seq.serialize_element(message)?;
                seq.end()
            }
            RelayMessage::Closed { subscription_id, message } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("CLOSED")?;
                seq.serialize_element(subscription_id)?;
                seq.serialize_element(message)?;
                seq.end()
            }
        }
    }
}

impl<'de> serde::Deserialize<'de> for RelayMessage {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut raw: Vec<serde_json::Value> = serde::Deserialize::deserialize(deserializer)?;
        if raw.is_empty() {
            return Err(serde::de::Error::custom("empty relay message"));
        }
        let tag = raw.remove(0);
        let tag = tag
            .as_str()
            .ok_or_else(|| serde::de::Error::custom("message tag must be a string"))?
            .to_string();
        let mut iter = raw.into_iter();
        let next_str = |iter: &mut std::vec::IntoIter<serde_json::Value>, what: &str| {
            iter.next()
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| serde::de::Error::custom(format!("{what} missing")))
        };
        match tag.as_str() {
            "EVENT" => {
                let subscription_id = next_str(&mut iter, "subscription id")?;
                let event = iter.next().ok_or_else(|| serde::de::Error::custom("EVENT missing payload"))?;
                let event: Event = serde_json::from_value(event).map_err(serde::de::Error::custom)?;
                Ok(RelayMessage::Event { subscription_id, event: Box::new(event) })
            }
            "OK" => {
                let event_id = next_str(&mut iter, "event id")?;
                let accepted = iter
                    .next()
                    .and_then(|v| v.as_bool())
                    .ok_or_else(|| serde::de::Error::custom("OK missing accepted flag"))?;
                let message = iter.next().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
                Ok(RelayMessage::Ok { event_id, accepted, message })
            }
            "EOSE" => Ok(RelayMessage::Eose { subscription_id: next_str(&mut iter, "subscription id")? }),
            "NOTICE" => Ok(RelayMessage::Notice { message: next_str(&mut iter, "notice message")? }),
            "CLOSED" => {
                let subscription_id = next_str(&mut iter, "subscription id")?;
                let message = iter.next().and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
                Ok(RelayMessage::Closed { subscription_id, message })
            }
            other => Err(serde::de::Error::custom(format!("unrecognized relay message tag {other}"))),
        }
    }
}

/// A relay-agnostic incoming event, tagged with which relay delivered it
/// (useful for the router's dedup bookkeeping, spec section 4.5).
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub relay_url: RelayUrl,
    pub event: Event,
}

/// One relay's answer to a `publish` (spec section 4.4): `accepted` reflects
/// the relay's NIP-01 `OK` frame, not merely whether the local write queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAck {
    pub relay_url: RelayUrl,
    pub accepted: bool,
    pub message: String,
}

/// How long `publish` waits for a relay's `OK` frame before treating that
/// relay as non-responsive.
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Fans a published event out to every connected relay and merges every
/// relay's incoming events (post-dedup) into one channel.
pub struct RelayGateway {
    connections: Mutex<HashMap<RelayUrl, Arc<RelayConnection>>>,
    inbound_tx: broadcast::Sender<InboundEvent>,
    dedup: Mutex<EventDedup>,
    pending_acks: Mutex<HashMap<(String, RelayUrl), oneshot::Sender<RelayAck>>>,
}

const INBOUND_CHANNEL_CAPACITY: usize = 1024;

/// Shares' dedup window: large enough to cover a full recovery ceremony's
/// worth of gift wraps without unbounded growth (SPEC_FULL.md C.1).
pub const DEDUP_CAPACITY: usize = 1024;

impl RelayGateway {
    pub fn new(relay_urls: Vec<RelayUrl>) -> Self {
        let (inbound_tx, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);
        let connections = relay_urls
            .into_iter()
            .map(|url| (url.clone(), Arc::new(RelayConnection::new(url))))
            .collect();
        Self {
            connections: Mutex::new(connections),
            inbound_tx,
            dedup: Mutex::new(EventDedup::new(DEDUP_CAPACITY)),
            pending_acks: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe_inbound(&self) -> broadcast::Receiver<InboundEvent> {
        self.inbound_tx.subscribe()
    }

    /// Publish to every connected relay and wait for each relay's NIP-01
    /// acknowledgement (spec section 4.4). A relay whose local write fails,
    /// or that never answers within [`ACK_TIMEOUT`], comes back
    /// `accepted: false` rather than being silently dropped from the vector.
    pub async fn publish(&self, event: Event) -> Vec<RelayAck> {
        let event_id = event.id.to_string();
        let connections = self.connections.lock().await;
        let mut waiters = Vec::with_capacity(connections.len());
        for conn in connections.values() {
            let url = conn.url().to_string();
            match conn.publish(event.clone()).await {
                Ok(()) => {
                    let (tx, rx) = oneshot::channel();
                    self.pending_acks.lock().await.insert((event_id.clone(), url.clone()), tx);
                    waiters.push((url, Some(rx)));
                }
                Err(e) => {
                    warn!(relay = %url, error = %e, "publish failed");
                    waiters.push((url, None));
                }
            }
        }
        drop(connections);

        join_all(waiters.into_iter().map(|(url, rx)| {
            let event_id = event_id.clone();
            async move {
                match rx {
                    None => RelayAck {
                        relay_url: url,
                        accepted: false,
                        message: "relay unreachable".into(),
                    },
                    Some(rx) => match timeout(ACK_TIMEOUT, rx).await {
                        Ok(Ok(ack)) => ack,
                        Ok(Err(_)) => RelayAck {
                            relay_url: url,
                            accepted: false,
                            message: "relay connection dropped before acknowledging".into(),
                        },
                        Err(_) => {
                            self.pending_acks.lock().await.remove(&(event_id, url.clone()));
                            RelayAck {
                                relay_url: url,
                                accepted: false,
                                message: "no acknowledgement before timeout".into(),
                            }
                        }
                    },
                }
            }
        }))
        .await
    }

    /// Accept an event freshly received from a relay, deduplicating against
    /// recent event ids (spec section 4.4) before forwarding it downstream.
    pub async fn deliver(&self, inbound: InboundEvent) {
        let mut dedup = self.dedup.lock().await;
        if dedup.seen(&inbound.event.id) {
            return;
        }
        drop(dedup);
        // No active subscribers is not an error; nothing is listening yet.
        let _ = self.inbound_tx.send(inbound);
    }

    pub async fn relay_statuses(&self) -> Vec<(RelayUrl, RelayStatus)> {
        let connections = self.connections.lock().await;
        let mut out = Vec::with_capacity(connections.len());
        for (url, conn) in connections.iter() {
            out.push((url.clone(), conn.status().await));
        }
        out
    }

    /// Start every configured relay's connect/reconnect loop and feed
    /// decoded `EVENT` frames back through [`Self::deliver`]'s dedup
    /// pipeline. Each relay's loop retries forever (spec section 4.4), so
    /// this only returns once every connection task has been torn down —
    /// in practice, never; the caller spawns this as a background task.
    pub async fn run(self: Arc<Self>, subscription_req: ClientMessage) {
        let connections: Vec<(RelayUrl, Arc<RelayConnection>)> = {
            let guard = self.connections.lock().await;
            guard.iter().map(|(url, conn)| (url.clone(), conn.clone())).collect()
        };

        let (relay_msg_tx, mut relay_msg_rx) = mpsc::unbounded_channel::<(RelayUrl, RelayMessage)>();

        for (url, conn) in connections {
            let tagged_tx = relay_msg_tx.clone();
            let req = subscription_req.clone();
            tokio::spawn(async move {
                let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
                let tag_url = url.clone();
                tokio::spawn(async move {
                    while let Some(msg) = raw_rx.recv().await {
                        if tagged_tx.send((tag_url.clone(), msg)).is_err() {
                            return;
                        }
                    }
                });
                conn.run(req, raw_tx).await;
            });
        }
        drop(relay_msg_tx);

        while let Some((url, msg)) = relay_msg_rx.recv().await {
            match msg {
                RelayMessage::Event { event, .. } => {
                    self.deliver(InboundEvent { relay_url: url, event: *event }).await;
                }
                RelayMessage::Ok { event_id, accepted, message } => {
                    let waiter = self.pending_acks.lock().await.remove(&(event_id, url.clone()));
                    if let Some(tx) = waiter {
                        let _ = tx.send(RelayAck { relay_url: url, accepted, message });
                    }
                }
                RelayMessage::Notice { message } => {
                    warn!(relay = %url, message, "relay notice");
                }
                RelayMessage::Eose { .. } | RelayMessage::Closed { .. } => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horcrux_core::Pubkey;

    fn sample_event() -> Event {
        Event::rumor(Pubkey::from_bytes([1u8; 32]), 0, 1337, vec![], "{}".into())
    }

    #[tokio::test]
    async fn deliver_deduplicates_by_event_id() {
        let gateway = RelayGateway::new(vec!["wss://relay.example".into()]);
        let mut rx = gateway.subscribe_inbound();

        let event = sample_event();
        gateway
            .deliver(InboundEvent { relay_url: "wss://relay.example".into(), event: event.clone() })
            .await;
        gateway
            .deliver(InboundEvent { relay_url: "wss://relay.mirror".into(), event: event.clone() })
            .await;

        let first = rx.try_recv().unwrap();
        assert_eq!(first.event.id, event.id);
        assert!(rx.try_recv().is_err(), "second delivery of the same id must be dropped");
    }

    #[tokio::test]
    async fn relay_statuses_lists_every_configured_relay() {
        let gateway = RelayGateway::new(vec!["wss://a".into(), "wss://b".into()]);
        let statuses = gateway.relay_statuses().await;
        assert_eq!(statuses.len(), 2);
    }

    #[tokio::test]
    async fn publish_with_no_live_relays_reports_every_relay_as_unaccepted() {
        let gateway = RelayGateway::new(vec!["wss://a".into(), "wss://b".into()]);
        let acks = gateway.publish(sample_event()).await;
        assert_eq!(acks.len(), 2);
        assert!(acks.iter().all(|ack| !ack.accepted));
    }

    #[tokio::test]
    async fn a_relay_ok_frame_resolves_the_matching_pending_ack() {
        // Exercises the same correlation table `run`'s dispatch loop uses,
        // without spinning up a real WebSocket connection.
        let gateway = RelayGateway::new(vec!["wss://a".into()]);
        let event_id = sample_event().id.to_string();

        let (tx, rx) = oneshot::channel();
        gateway.pending_acks.lock().await.insert((event_id.clone(), "wss://a".into()), tx);

        let waiter = gateway.pending_acks.lock().await.remove(&(event_id, "wss://a".into()));
        let ack = RelayAck { relay_url: "wss://a".into(), accepted: true, message: "".into() };
        waiter.unwrap().send(ack.clone()).unwrap();

        assert_eq!(rx.await.unwrap(), ack);
    }

    #[test]
    fn req_serializes_as_a_tagged_json_array() {
        let msg = ClientMessage::Req {
            subscription_id: "sub0".into(),
            filters: vec![Filter { kinds: Some(vec![1059]), ..Default::default() }],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.starts_with(r#"["REQ","sub0""#));
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn close_round_trips() {
        let msg = ClientMessage::Close { subscription_id: "sub0".into() };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"["CLOSE","sub0"]"#);
        assert_eq!(serde_json::from_str::<ClientMessage>(&json).unwrap(), msg);
    }

    #[test]
    fn ok_message_round_trips() {
        let msg = RelayMessage::Ok { event_id: "abc".into(), accepted: true, message: "".into() };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(serde_json::from_str::<RelayMessage>(&json).unwrap(), msg);
    }

    #[test]
    fn eose_round_trips() {
        let msg = RelayMessage::Eose { subscription_id: "sub0".into() };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"["EOSE","sub0"]"#);
        assert_eq!(serde_json::from_str::<RelayMessage>(&json).unwrap(), msg);
    }

    #[test]
    fn event_message_round_trips() {
        let msg = RelayMessage::Event { subscription_id: "sub0".into(), event: Box::new(sample_event()) };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(serde_json::from_str::<RelayMessage>(&json).unwrap(), msg);
    }
}
