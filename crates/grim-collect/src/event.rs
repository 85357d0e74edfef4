use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One entry in a session's server-maintained, sequence-numbered event log.
///
/// The same logical event has two representations: REST rows carry the
/// payload as a string-encoded `payload_json` field, while WebSocket `event`
/// envelopes carry it as a native object. Both decode into this shape; event
/// identity is the `seq` number, never payload equality.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameEvent {
    #[serde(default)]
    pub seq: Option<u64>,
    pub event_type: String,
    #[serde(default)]
    pub actor_user_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

fn parse_embedded_payload(raw: &str) -> Value {
    // Malformed payload_json degrades to an empty object, never an error.
    serde_json::from_str(raw).unwrap_or_else(|_| json!({}))
}

fn decode(value: &Value) -> GameEvent {
    let seq = value.get("seq").and_then(Value::as_u64);
    let event_type = value
        .get("event_type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let actor_user_id = value
        .get("actor_user_id")
        .and_then(Value::as_str)
        .filter(|actor| !actor.is_empty())
        .map(str::to_string);

    let payload = match value.get("payload") {
        Some(Value::String(raw)) => parse_embedded_payload(raw),
        Some(object) if !object.is_null() => object.clone(),
        _ => value
            .get("payload_json")
            .and_then(Value::as_str)
            .map(parse_embedded_payload)
            .unwrap_or_else(|| json!({})),
    };

    GameEvent {
        seq,
        event_type,
        actor_user_id,
        payload,
    }
}

impl GameEvent {
    /// Decodes the payload of a WebSocket `event` envelope.
    pub fn from_stream_payload(value: &Value) -> Self {
        decode(value)
    }

    /// Decodes one row of the REST historical event list.
    pub fn from_rest_row(row: &Value) -> Self {
        decode(row)
    }

    /// The human-readable message for chat-like event types.
    pub fn chat_message(&self) -> Option<&str> {
        self.payload.get("message").and_then(Value::as_str)
    }
}
