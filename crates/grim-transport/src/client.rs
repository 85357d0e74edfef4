use std::time::{Duration, Instant};

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

use crate::envelope::{
    build_command_frame, build_subscribe_frame, parse_server_envelope, ReplayAnchor,
    ServerEnvelope, SubscriptionState,
};

/// Default per-call budget for [`Transport::receive`]. Short enough that a
/// cooperative stop signal is observed promptly between reads.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_millis(500);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
/// Enumerates supported `TransportError` values.
pub enum TransportError {
    #[error("failed to establish websocket connection: {0}")]
    Connect(String),
    #[error("timed out waiting for a websocket frame")]
    Timeout,
    #[error("websocket connection closed")]
    Closed,
    #[error("failed to send websocket frame: {0}")]
    Send(String),
    #[error("invalid websocket frame: {0}")]
    InvalidFrame(String),
    #[error("protocol misuse: {0}")]
    ProtocolMisuse(String),
}

impl TransportError {
    /// Read timeouts are the only recoverable receive failure; everything
    /// else is terminal for this transport instance.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// One WebSocket connection to the session server.
///
/// There is no internal buffering beyond the in-flight frame and no silent
/// reconnect: once the connection closes, the instance is dead and the
/// session controller decides whether to build a new one.
pub struct Transport {
    sink: SplitSink<WsStream, WsMessage>,
    source: SplitStream<WsStream>,
    subscription: SubscriptionState,
    request_counter: u64,
    closed: bool,
}

fn authenticated_url(endpoint: &str, token: &str) -> String {
    if endpoint.contains('?') {
        format!("{endpoint}&token={token}")
    } else {
        format!("{endpoint}?token={token}")
    }
}

impl Transport {
    /// Connects and authenticates via the `token` query parameter.
    pub async fn connect(endpoint: &str, token: &str) -> Result<Self, TransportError> {
        let url = authenticated_url(endpoint, token);
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        tracing::debug!(endpoint, "websocket connected");
        let (sink, source) = stream.split();
        Ok(Self {
            sink,
            source,
            subscription: SubscriptionState::default(),
            request_counter: 0,
            closed: false,
        })
    }

    fn next_request_id(&mut self) -> String {
        self.request_counter = self.request_counter.saturating_add(1);
        format!("req-{}", self.request_counter)
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription == SubscriptionState::Acked
    }

    /// Sends a `subscribe` envelope anchored at `anchor` and returns the
    /// correlation token. The acknowledgment arrives through `receive`.
    pub async fn subscribe(
        &mut self,
        room_id: &str,
        anchor: ReplayAnchor,
    ) -> Result<String, TransportError> {
        let request_id = self.next_request_id();
        let frame = build_subscribe_frame(room_id, anchor, &request_id);
        self.send_text(frame).await?;
        self.subscription.mark_sent();
        tracing::debug!(room_id, last_seq = anchor.last_seq(), "subscribe sent");
        Ok(request_id)
    }

    /// Sends a `command` envelope. Refused with `ProtocolMisuse` until the
    /// `subscribed` acknowledgment has been observed.
    pub async fn send_command(
        &mut self,
        room_id: &str,
        command_type: &str,
    ) -> Result<String, TransportError> {
        self.subscription.ensure_command_allowed()?;
        let request_id = self.next_request_id();
        let frame = build_command_frame(room_id, command_type, &request_id);
        self.send_text(frame).await?;
        tracing::debug!(room_id, command_type, "command sent");
        Ok(request_id)
    }

    async fn send_text(&mut self, frame: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sink
            .send(WsMessage::Text(frame.into()))
            .await
            .map_err(|error| TransportError::Send(error.to_string()))
    }

    /// Blocks until one envelope arrives, `timeout` elapses, or the
    /// connection closes. The single suspension point of this component.
    pub async fn receive(&mut self, timeout: Duration) -> Result<ServerEnvelope, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            let next = tokio::time::timeout(remaining, self.source.next())
                .await
                .map_err(|_| TransportError::Timeout)?;
            let Some(frame) = next else {
                self.closed = true;
                return Err(TransportError::Closed);
            };
            let message = match frame {
                Ok(message) => message,
                Err(error) => {
                    tracing::debug!(%error, "websocket read failed, treating as closed");
                    self.closed = true;
                    return Err(TransportError::Closed);
                }
            };
            match message {
                WsMessage::Text(text) => return self.classify_frame(text.as_str()),
                WsMessage::Binary(bytes) => {
                    let text = String::from_utf8(bytes.to_vec())
                        .map_err(|error| TransportError::InvalidFrame(error.to_string()))?;
                    return self.classify_frame(&text);
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
                WsMessage::Close(_) => {
                    self.closed = true;
                    return Err(TransportError::Closed);
                }
            }
        }
    }

    fn classify_frame(&mut self, raw: &str) -> Result<ServerEnvelope, TransportError> {
        let envelope = parse_server_envelope(raw)?;
        if matches!(envelope, ServerEnvelope::Subscribed { .. }) {
            self.subscription.mark_acked();
        }
        Ok(envelope)
    }

    /// Drains envelopes until the `subscribed` acknowledgment arrives,
    /// returning everything observed before it so no envelope is dropped.
    pub async fn await_subscribed(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<ServerEnvelope>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut preceding = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            let envelope = self.receive(remaining).await?;
            if matches!(envelope, ServerEnvelope::Subscribed { .. }) {
                return Ok(preceding);
            }
            preceding.push(envelope);
        }
    }

    /// Closes the connection. Idempotent and safe to call after the peer
    /// already closed on its own.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(error) = self.sink.send(WsMessage::Close(None)).await {
            tracing::debug!(%error, "websocket close raced peer shutdown");
        }
    }
}
