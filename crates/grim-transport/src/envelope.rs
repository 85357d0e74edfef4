use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::TransportError;

/// Where a new subscription anchors in the session's event log.
///
/// The server does not document whether `last_seq = 0` replays history or
/// starts from "now", so the anchor is an explicit caller choice: callers
/// must treat `FromStart` as "replay if the server supports it, otherwise
/// live-only" and never assume historical replay is guaranteed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayAnchor {
    FromStart,
    FromSeq(u64),
}

impl ReplayAnchor {
    pub fn last_seq(&self) -> u64 {
        match self {
            Self::FromStart => 0,
            Self::FromSeq(seq) => *seq,
        }
    }
}

/// Result payload of a `command_result` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CommandResult {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub applied_seq_from: Option<u64>,
    #[serde(default)]
    pub applied_seq_to: Option<u64>,
}

/// One server-to-client envelope, classified by its `type` tag.
///
/// Unrecognized kinds are preserved as `Unknown` rather than rejected: the
/// stream keeps flowing and the collector counts them as protocol misuse.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEnvelope {
    Subscribed {
        request_id: Option<String>,
        payload: Value,
    },
    Event {
        payload: Value,
    },
    CommandResult {
        request_id: Option<String>,
        result: CommandResult,
    },
    Error {
        payload: Value,
    },
    Unknown {
        kind: String,
        payload: Value,
    },
}

impl ServerEnvelope {
    pub fn kind(&self) -> &str {
        match self {
            Self::Subscribed { .. } => "subscribed",
            Self::Event { .. } => "event",
            Self::CommandResult { .. } => "command_result",
            Self::Error { .. } => "error",
            Self::Unknown { kind, .. } => kind.as_str(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawServerFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    request_id: Option<String>,
}

/// Parses one JSON text frame into a [`ServerEnvelope`].
pub fn parse_server_envelope(raw: &str) -> Result<ServerEnvelope, TransportError> {
    let frame = serde_json::from_str::<RawServerFrame>(raw)
        .map_err(|error| TransportError::InvalidFrame(error.to_string()))?;

    let envelope = match frame.kind.as_str() {
        "subscribed" => ServerEnvelope::Subscribed {
            request_id: frame.request_id,
            payload: frame.payload,
        },
        "event" => ServerEnvelope::Event {
            payload: frame.payload,
        },
        "command_result" => {
            let result = serde_json::from_value::<CommandResult>(frame.payload)
                .map_err(|error| TransportError::InvalidFrame(error.to_string()))?;
            ServerEnvelope::CommandResult {
                request_id: frame.request_id,
                result,
            }
        }
        "error" => ServerEnvelope::Error {
            payload: frame.payload,
        },
        other => ServerEnvelope::Unknown {
            kind: other.to_string(),
            payload: frame.payload,
        },
    };
    Ok(envelope)
}

/// Builds the JSON text frame for a `subscribe` envelope.
pub fn build_subscribe_frame(room_id: &str, anchor: ReplayAnchor, request_id: &str) -> String {
    json!({
        "type": "subscribe",
        "request_id": request_id,
        "payload": {
            "room_id": room_id,
            "last_seq": anchor.last_seq(),
        },
    })
    .to_string()
}

/// Builds the JSON text frame for a `command` envelope.
pub fn build_command_frame(room_id: &str, command_type: &str, request_id: &str) -> String {
    json!({
        "type": "command",
        "request_id": request_id,
        "payload": {
            "room_id": room_id,
            "type": command_type,
        },
    })
    .to_string()
}

/// Subscription acknowledgment state for one connection.
///
/// A `subscribe` must be acknowledged by a `subscribed` envelope before any
/// command is sent; sending earlier is protocol misuse and is refused here
/// rather than forwarded to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    #[default]
    Unsubscribed,
    Pending,
    Acked,
}

impl SubscriptionState {
    pub fn mark_sent(&mut self) {
        if *self == Self::Unsubscribed {
            *self = Self::Pending;
        }
    }

    pub fn mark_acked(&mut self) {
        *self = Self::Acked;
    }

    pub fn ensure_command_allowed(&self) -> Result<(), TransportError> {
        match self {
            Self::Acked => Ok(()),
            Self::Unsubscribed => Err(TransportError::ProtocolMisuse(
                "command sent before subscribe".to_string(),
            )),
            Self::Pending => Err(TransportError::ProtocolMisuse(
                "command sent before subscription acknowledgment".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        build_command_frame, build_subscribe_frame, parse_server_envelope, ReplayAnchor,
        ServerEnvelope, SubscriptionState,
    };
    use crate::client::TransportError;

    #[test]
    fn unit_subscribe_frame_carries_room_and_anchor() {
        let frame = build_subscribe_frame("room-1", ReplayAnchor::FromSeq(4), "req-1");
        let value: serde_json::Value = serde_json::from_str(&frame).expect("frame json");
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["request_id"], "req-1");
        assert_eq!(value["payload"]["room_id"], "room-1");
        assert_eq!(value["payload"]["last_seq"], 4);

        let from_start = build_subscribe_frame("room-1", ReplayAnchor::FromStart, "req-2");
        let value: serde_json::Value = serde_json::from_str(&from_start).expect("frame json");
        assert_eq!(value["payload"]["last_seq"], 0);
    }

    #[test]
    fn unit_command_frame_carries_command_type() {
        let frame = build_command_frame("room-1", "start_game", "req-3");
        let value: serde_json::Value = serde_json::from_str(&frame).expect("frame json");
        assert_eq!(value["type"], "command");
        assert_eq!(value["payload"]["type"], "start_game");
        assert_eq!(value["payload"]["room_id"], "room-1");
    }

    #[test]
    fn functional_parse_classifies_known_envelope_kinds() {
        let subscribed = parse_server_envelope(r#"{"type":"subscribed","payload":{}}"#)
            .expect("subscribed parses");
        assert!(matches!(subscribed, ServerEnvelope::Subscribed { .. }));

        let event = parse_server_envelope(
            r#"{"type":"event","payload":{"seq":7,"event_type":"public.chat"}}"#,
        )
        .expect("event parses");
        let ServerEnvelope::Event { payload } = event else {
            panic!("expected event envelope");
        };
        assert_eq!(payload["seq"], 7);

        let result = parse_server_envelope(
            r#"{"type":"command_result","request_id":"req-9","payload":{"status":"applied","applied_seq_from":1,"applied_seq_to":12}}"#,
        )
        .expect("command result parses");
        let ServerEnvelope::CommandResult { request_id, result } = result else {
            panic!("expected command_result envelope");
        };
        assert_eq!(request_id.as_deref(), Some("req-9"));
        assert_eq!(result.status, "applied");
        assert_eq!(result.applied_seq_to, Some(12));
    }

    #[test]
    fn functional_parse_preserves_unknown_kinds() {
        let unknown = parse_server_envelope(r#"{"type":"heartbeat","payload":{"tick":3}}"#)
            .expect("unknown kind still parses");
        let ServerEnvelope::Unknown { kind, payload } = unknown else {
            panic!("expected unknown envelope");
        };
        assert_eq!(kind, "heartbeat");
        assert_eq!(payload, json!({"tick": 3}));
    }

    #[test]
    fn regression_parse_rejects_non_json_frames() {
        let error = parse_server_envelope("not-json").expect_err("invalid json should fail");
        assert!(matches!(error, TransportError::InvalidFrame(_)));
    }

    #[test]
    fn unit_subscription_state_gates_commands() {
        let mut state = SubscriptionState::default();
        assert!(matches!(
            state.ensure_command_allowed(),
            Err(TransportError::ProtocolMisuse(_))
        ));

        state.mark_sent();
        assert_eq!(state, SubscriptionState::Pending);
        assert!(matches!(
            state.ensure_command_allowed(),
            Err(TransportError::ProtocolMisuse(_))
        ));

        state.mark_acked();
        assert!(state.ensure_command_allowed().is_ok());
    }
}
