use std::time::Duration;

use anyhow::{Context, Result};
use grim_api::ApiClient;
use grim_collect::{
    divergence, reconcile, CollectorExit, CollectorHandle, CollectorOutput, Divergence,
    EnvelopeSource, ReconciledLog, StopDecision, StopPolicy, StopReason,
};
use grim_transport::{ReplayAnchor, ServerEnvelope, Transport, RECEIVE_TIMEOUT};
use tokio::time::Instant;

use crate::result::RunResult;

/// Everything one session run needs. Defaults mirror a local dev server
/// with a short chat quorum so a run completes in about a minute.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub ws_url: String,
    /// Label recorded in the result, normally the narrator backend name.
    pub provider_label: String,
    pub room_name: String,
    pub edition: String,
    pub bot_count: u32,
    pub replay_anchor: ReplayAnchor,
    pub chat_event_type: String,
    pub start_command: String,
    pub policy: StopPolicy,
    pub poll_interval: Duration,
    pub subscribe_timeout: Duration,
    pub api_timeout: Duration,
}

impl SessionConfig {
    pub fn new(base_url: &str, ws_url: &str, provider_label: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ws_url: ws_url.to_string(),
            provider_label: provider_label.to_string(),
            room_name: format!("harness-{provider_label}"),
            edition: "tb".to_string(),
            bot_count: 7,
            replay_anchor: ReplayAnchor::FromStart,
            chat_event_type: "public.chat".to_string(),
            start_command: "start_game".to_string(),
            policy: StopPolicy {
                terminal_event_type: Some("game.ended".to_string()),
                quorum: Some(grim_collect::Quorum {
                    event_type: "public.chat".to_string(),
                    count: 4,
                }),
                hard_budget: Duration::from_secs(60),
                grace: Duration::from_secs(5),
            },
            poll_interval: Duration::from_secs(1),
            subscribe_timeout: Duration::from_secs(10),
            api_timeout: Duration::from_secs(15),
        }
    }
}

/// Full outcome of one session run: the persisted result plus the raw
/// material a caller may want for diagnostics.
#[derive(Debug)]
pub struct SessionReport {
    pub result: RunResult,
    pub log: ReconciledLog,
    /// Events observed live, before reconciliation.
    pub live_observed: usize,
    pub control_messages: usize,
    pub misuse_count: u64,
    pub stop_reason: StopReason,
    pub divergence: Divergence,
}

/// Spawns the collector over `source` and polls the stop policy until it
/// fires; a quorum trigger drains the grace window before stopping so
/// closely-following events are still captured.
async fn collect_until_stop<S: EnvelopeSource + 'static>(
    source: S,
    preload: Vec<ServerEnvelope>,
    policy: &StopPolicy,
    poll_interval: Duration,
    receive_timeout: Duration,
) -> Result<(CollectorOutput, S, CollectorExit, StopReason), tokio::task::JoinError> {
    let started = Instant::now();
    let handle = CollectorHandle::spawn(source, preload, receive_timeout);

    let stop_reason = loop {
        tokio::time::sleep(poll_interval).await;
        let snapshot = handle.snapshot();
        match policy.evaluate(&snapshot, started.elapsed()) {
            StopDecision::Continue => {
                tracing::debug!(
                    events = snapshot.buffer_len,
                    elapsed = started.elapsed().as_secs(),
                    "collection in progress"
                );
            }
            StopDecision::Stop(reason) => break reason,
            StopDecision::StopAfterGrace(reason) => {
                tracing::info!(
                    ?reason,
                    grace_secs = policy.grace.as_secs(),
                    "quorum reached, draining grace window"
                );
                tokio::time::sleep(policy.grace).await;
                break reason;
            }
        }
    };

    let (output, source, exit) = handle.stop().await?;
    Ok((output, source, exit, stop_reason))
}

/// Drives one session end to end: provision the room, subscribe, trigger
/// the game, collect until the stop policy fires, close the connection,
/// then reconcile against the authoritative event list.
pub async fn run_session(config: &SessionConfig) -> Result<SessionReport> {
    let api = ApiClient::new(&config.base_url, config.api_timeout)
        .context("failed to build api client")?;

    let session = api
        .quick_login(&format!("tester_{}", config.provider_label))
        .await
        .context("quick login failed")?;
    tracing::info!(user_id = %session.user_id, "logged in");

    let room_id = api
        .create_room(&session.token, &config.room_name, &config.edition)
        .await
        .context("room creation failed")?;
    api.join_room(&session.token, &room_id)
        .await
        .context("joining the room failed")?;
    api.add_bots(&session.token, &room_id, config.bot_count)
        .await
        .context("seating bots failed")?;
    tracing::info!(%room_id, bots = config.bot_count, "room provisioned");

    let mut transport = Transport::connect(&config.ws_url, &session.token)
        .await
        .context("websocket connect failed")?;
    transport
        .subscribe(&room_id, config.replay_anchor)
        .await
        .context("subscribe failed")?;
    let preload = transport
        .await_subscribed(config.subscribe_timeout)
        .await
        .context("subscription was never acknowledged")?;
    transport
        .send_command(&room_id, &config.start_command)
        .await
        .context("start command failed")?;

    let started = Instant::now();
    let (output, mut transport, exit, stop_reason) = collect_until_stop(
        transport,
        preload,
        &config.policy,
        config.poll_interval,
        RECEIVE_TIMEOUT,
    )
    .await
    .context("collector task panicked")?;
    let elapsed_seconds = started.elapsed().as_secs();
    if exit == CollectorExit::SourceClosed {
        tracing::warn!("server closed the stream before the stop policy fired");
    }
    // Last action on the connection; the authoritative fetch below must
    // never race a stream that is still appending.
    transport.close().await;
    tracing::info!(
        ?stop_reason,
        live_events = output.events.len(),
        elapsed_seconds,
        "collection stopped"
    );

    match api.room_state(&session.token, &room_id).await {
        Ok(state) => tracing::info!(
            phase = %state.phase,
            night_count = state.night_count,
            alive = state.alive_count(),
            "final room state"
        ),
        Err(error) => tracing::debug!(%error, "room state fetch failed"),
    }

    let rest = match api.room_events(&session.token, &room_id).await {
        Ok(rows) => Some(rows),
        Err(error) => {
            tracing::warn!(%error, "authoritative event fetch failed");
            None
        }
    };

    let diverged = rest
        .as_deref()
        .map(|rows| divergence(rows, &output.events))
        .unwrap_or_default();
    if !diverged.is_empty() {
        tracing::warn!(
            only_rest = ?diverged.only_rest,
            only_live = ?diverged.only_live,
            "event sources diverge by seq"
        );
    }

    let log = reconcile(rest, &output.events);
    let result = RunResult::from_log(
        &config.provider_label,
        &room_id,
        elapsed_seconds,
        &log,
        &config.chat_event_type,
    );

    Ok(SessionReport {
        result,
        log,
        live_observed: output.events.len(),
        control_messages: output.control.len(),
        misuse_count: output.misuse_count,
        stop_reason,
        divergence: diverged,
    })
}
