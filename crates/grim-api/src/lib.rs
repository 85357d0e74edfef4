//! REST client for the clocktower session server.
//!
//! Stateless request/response calls with bearer-token authentication: quick
//! login, room provisioning, bot seating, state snapshots, and the
//! authoritative historical event list the reconciler prefers.

use std::{collections::HashMap, time::Duration};

use grim_collect::GameEvent;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `ApiError` values.
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned non-success status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Credentials issued by quick login.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user_id: String,
}

/// One seat in the room state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerState {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub alive: bool,
}

/// Phase/turn snapshot of a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomState {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub night_count: u64,
    #[serde(default)]
    pub players: HashMap<String, PlayerState>,
}

impl RoomState {
    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|player| player.alive).count()
    }
}

/// Narrator backend advertised by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmHealth {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
}

/// Authenticated JSON client for one server base URL. One call per
/// invocation, no session state beyond the caller-held token.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout.max(Duration::from_millis(1)))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn request_json(
        &self,
        method: reqwest::Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.request(method, &url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: raw,
            });
        }
        serde_json::from_str(&raw)
            .map_err(|error| ApiError::InvalidResponse(format!("{url}: {error}")))
    }

    async fn post_json(
        &self,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        self.request_json(reqwest::Method::POST, path, token, body)
            .await
    }

    async fn get_json(&self, path: &str, token: Option<&str>) -> Result<Value, ApiError> {
        self.request_json(reqwest::Method::GET, path, token, None)
            .await
    }

    /// Issues a throwaway identity: token plus participant id.
    pub async fn quick_login(&self, name: &str) -> Result<AuthSession, ApiError> {
        let value = self
            .post_json("/v1/auth/quick", None, Some(json!({ "name": name })))
            .await?;
        serde_json::from_value(value)
            .map_err(|error| ApiError::InvalidResponse(format!("auth/quick: {error}")))
    }

    /// Creates a room; `edition` selects the ruleset variant.
    pub async fn create_room(
        &self,
        token: &str,
        name: &str,
        edition: &str,
    ) -> Result<String, ApiError> {
        let value = self
            .post_json(
                "/v1/rooms",
                Some(token),
                Some(json!({ "name": name, "edition": edition })),
            )
            .await?;
        value
            .get("room_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::InvalidResponse("rooms: missing room_id".to_string()))
    }

    pub async fn join_room(&self, token: &str, room_id: &str) -> Result<(), ApiError> {
        self.post_json(&format!("/v1/rooms/{room_id}/join"), Some(token), None)
            .await?;
        Ok(())
    }

    /// Seats `count` server-driven bots in the room.
    pub async fn add_bots(&self, token: &str, room_id: &str, count: u32) -> Result<(), ApiError> {
        self.post_json(
            &format!("/v1/rooms/{room_id}/bots"),
            Some(token),
            Some(json!({ "count": count })),
        )
        .await?;
        Ok(())
    }

    pub async fn room_state(&self, token: &str, room_id: &str) -> Result<RoomState, ApiError> {
        let value = self
            .get_json(&format!("/v1/rooms/{room_id}/state"), Some(token))
            .await?;
        serde_json::from_value(value)
            .map_err(|error| ApiError::InvalidResponse(format!("rooms/state: {error}")))
    }

    /// Fetches the authoritative historical event list, ordered by the
    /// server. Rows decode leniently; a malformed row never fails the fetch.
    pub async fn room_events(
        &self,
        token: &str,
        room_id: &str,
    ) -> Result<Vec<GameEvent>, ApiError> {
        let value = self
            .get_json(&format!("/v1/rooms/{room_id}/events"), Some(token))
            .await?;
        let rows = value
            .as_array()
            .or_else(|| value.get("events").and_then(Value::as_array))
            .ok_or_else(|| {
                ApiError::InvalidResponse("rooms/events: expected an array".to_string())
            })?;
        Ok(rows.iter().map(GameEvent::from_rest_row).collect())
    }

    pub async fn health(&self) -> Result<(), ApiError> {
        self.get_json("/health", None).await?;
        Ok(())
    }

    /// Reports which narrator backend the server is configured with.
    pub async fn llm_health(&self) -> Result<LlmHealth, ApiError> {
        let value = self.get_json("/v1/llm/health", None).await?;
        serde_json::from_value(value)
            .map_err(|error| ApiError::InvalidResponse(format!("llm/health: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{PlayerState, RoomState};

    #[test]
    fn unit_room_state_counts_alive_players() {
        let mut players = HashMap::new();
        players.insert(
            "u1".to_string(),
            PlayerState {
                role: Some("imp".to_string()),
                alive: true,
            },
        );
        players.insert(
            "u2".to_string(),
            PlayerState {
                role: Some("monk".to_string()),
                alive: false,
            },
        );
        let state = RoomState {
            phase: "night".to_string(),
            night_count: 1,
            players,
        };
        assert_eq!(state.alive_count(), 1);
    }
}
