use std::path::Path;

use anyhow::{Context, Result};
use grim_collect::{Provenance, ReconciledLog};
use grim_core::write_text_atomic;
use serde::{Deserialize, Serialize};

/// One chat-like event flattened for reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatLine {
    pub seq: Option<u64>,
    pub actor: Option<String>,
    pub message: String,
}

/// The persisted artifact of one session run, consumed later by the
/// compare tool. Provenance is always recorded so a best-effort run can
/// never masquerade as an authoritative one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub provider: String,
    pub room_id: String,
    pub total_events: usize,
    pub chat_count: usize,
    pub elapsed_seconds: u64,
    pub provenance: Provenance,
    pub messages: Vec<ChatLine>,
}

impl RunResult {
    /// Flattens a reconciled log into the result record, extracting chat
    /// lines for the configured chat event type.
    pub fn from_log(
        provider: &str,
        room_id: &str,
        elapsed_seconds: u64,
        log: &ReconciledLog,
        chat_event_type: &str,
    ) -> Self {
        let messages: Vec<ChatLine> = log
            .events
            .iter()
            .filter(|event| event.event_type == chat_event_type)
            .map(|event| ChatLine {
                seq: event.seq,
                actor: event.actor_user_id.clone(),
                message: event
                    .chat_message()
                    .map(str::to_string)
                    .unwrap_or_else(|| event.payload.to_string()),
            })
            .collect();

        Self {
            provider: provider.to_string(),
            room_id: room_id.to_string(),
            total_events: log.events.len(),
            chat_count: messages.len(),
            elapsed_seconds,
            provenance: log.provenance,
            messages,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let rendered =
            serde_json::to_string_pretty(self).context("failed to serialize run result")?;
        write_text_atomic(path, &rendered)
            .with_context(|| format!("failed to write run result {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read run result {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse run result {}", path.display()))
    }
}
