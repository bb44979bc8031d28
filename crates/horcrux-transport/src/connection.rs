//! A single relay's WebSocket connection: reconnect with jittered backoff,
//! publish, and forward inbound frames (spec section 4.4).

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use horcrux_envelope::Event;

use crate::{ClientMessage, RelayMessage, RelayUrl, TransportError};

/// Backoff never exceeds this, no matter how many consecutive failures
/// (SPEC_FULL.md C.1).
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    Connecting,
    Connected,
    Reconnecting { attempt: u32, last_error: String },
    Disconnected,
}

struct Inner {
    status: RelayStatus,
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
}

/// Owns one relay URL's connection lifecycle. `run` drives the reconnect
/// loop and should be spawned as a background task by whatever composes the
/// gateway; `publish` and `status` are safe to call from anywhere.
pub struct RelayConnection {
    url: RelayUrl,
    inner: Mutex<Inner>,
}

impl RelayConnection {
    pub fn new(url: RelayUrl) -> Self {
        Self {
            url,
            inner: Mutex::new(Inner { status: RelayStatus::Disconnected, outbound: None }),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn status(&self) -> RelayStatus {
        self.inner.lock().await.status.clone()
    }

    /// Queue an event for this relay. Fails if the socket is not currently
    /// connected; the caller (the gateway) treats this as best-effort and
    /// tries the next relay.
    pub async fn publish(&self, event: Event) -> Result<(), TransportError> {
        let inner = self.inner.lock().await;
        let tx = inner
            .outbound
            .as_ref()
            .ok_or_else(|| TransportError::RelayUnreachable { url: self.url.clone() })?;
        let msg = ClientMessage::Event(Box::new(event));
        let json = serde_json::to_string(&msg).map_err(|_| TransportError::RelayUnreachable {
            url: self.url.clone(),
        })?;
        tx.send(WsMessage::Text(json))
            .map_err(|_| TransportError::RelayUnreachable { url: self.url.clone() })
    }

    /// Drive the connect/read/reconnect loop. Runs until cancelled.
    /// `on_inbound` is called for every relay message successfully decoded.
    pub async fn run(
        self: Arc<Self>,
        subscription_req: ClientMessage,
        on_inbound: mpsc::UnboundedSender<RelayMessage>,
    ) {
        let mut attempt = 0u32;
        loop {
            {
                let mut inner = self.inner.lock().await;
                inner.status = if attempt == 0 {
                    RelayStatus::Connecting
                } else {
                    RelayStatus::Reconnecting { attempt, last_error: String::new() }
                };
            }

            match self.connect_once(&subscription_req, &on_inbound).await {
                Ok(()) => {
                    // connect_once only returns Ok on a clean close; still reconnect.
                    attempt = 0;
                }
                Err(e) => {
                    warn!(relay = %self.url, error = %e, attempt, "relay connection dropped");
                    let mut inner = self.inner.lock().await;
                    inner.status = RelayStatus::Reconnecting { attempt: attempt + 1, last_error: e };
                    inner.outbound = None;
                }
            }

            attempt += 1;
            let backoff = backoff_for(attempt);
            debug!(relay = %self.url, backoff_ms = backoff.as_millis() as u64, "backing off before reconnect");
            tokio::time::sleep(backoff).await;
        }
    }

    async fn connect_once(
        &self,
        subscription_req: &ClientMessage,
        on_inbound: &mpsc::UnboundedSender<RelayMessage>,
    ) -> Result<(), String> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| e.to_string())?;
        let (mut write, mut read) = ws_stream.split();

        let req_json = serde_json::to_string(subscription_req).map_err(|e| e.to_string())?;
        write.send(WsMessage::Text(req_json)).await.map_err(|e| e.to_string())?;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.inner.lock().await;
            inner.status = RelayStatus::Connected;
            inner.outbound = Some(outbound_tx);
        }
        info!(relay = %self.url, "relay connected");

        loop {
            tokio::select! {
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(msg) => {
                            if let Err(e) = write.send(msg).await {
                                return Err(e.to_string());
                            }
                        }
                        None => return Ok(()),
                    }
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<RelayMessage>(&text) {
                                Ok(relay_msg) => {
                                    let _ = on_inbound.send(relay_msg);
                                }
                                Err(e) => debug!(relay = %self.url, error = %e, "unparseable relay frame"),
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.to_string()),
                    }
                }
            }
        }
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let base = INITIAL_BACKOFF.saturating_mul(1u32 << attempt.min(7));
    let capped = base.min(MAX_BACKOFF);
    let jitter_ms = rand::random::<u64>() % 250;
    capped + Duration::from_millis(jitter_ms)
}
