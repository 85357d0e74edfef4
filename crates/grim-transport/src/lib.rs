//! WebSocket transport for the clocktower session server.
//!
//! Owns one connection, speaks the `subscribe`/`command`/`event` envelope
//! protocol, and exposes a single blocking `receive` suspension point.
//! Buffering and classification of received envelopes belong to the
//! collector, not this crate.

mod client;
mod envelope;

pub use client::{Transport, TransportError, RECEIVE_TIMEOUT};
pub use envelope::{
    build_command_frame, build_subscribe_frame, parse_server_envelope, CommandResult,
    ReplayAnchor, ServerEnvelope, SubscriptionState,
};
