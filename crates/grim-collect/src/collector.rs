use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use grim_transport::{ServerEnvelope, Transport, TransportError};
use tokio::{sync::watch, task::JoinHandle};

use crate::event::GameEvent;

/// Source of server envelopes consumed by the collector loop. The live
/// implementation is [`Transport::receive`]; tests feed scripted streams.
#[async_trait]
pub trait EnvelopeSource: Send {
    async fn next_envelope(&mut self, timeout: Duration)
        -> Result<ServerEnvelope, TransportError>;
}

#[async_trait]
impl EnvelopeSource for Transport {
    async fn next_envelope(
        &mut self,
        timeout: Duration,
    ) -> Result<ServerEnvelope, TransportError> {
        self.receive(timeout).await
    }
}

/// Non-blocking point-in-time view of the collected buffer, read by the
/// completion detector without stalling the producer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectorSnapshot {
    pub buffer_len: usize,
    pub type_counts: HashMap<String, u64>,
    pub control_count: usize,
    pub misuse_count: u64,
}

impl CollectorSnapshot {
    pub fn count_of(&self, event_type: &str) -> u64 {
        self.type_counts.get(event_type).copied().unwrap_or(0)
    }

    pub fn has_seen(&self, event_type: &str) -> bool {
        self.count_of(event_type) > 0
    }
}

/// Why the collector loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorExit {
    /// Cooperative stop signal from the session controller.
    Stopped,
    /// The underlying transport reported closure; looping on a dead socket
    /// is never attempted.
    SourceClosed,
}

/// Everything the collector accumulated: the append-only event buffer in
/// arrival order, control envelopes kept apart for protocol debugging, and
/// the count of unrecognized envelope kinds.
#[derive(Debug, Default)]
pub struct CollectorOutput {
    pub events: Vec<GameEvent>,
    pub control: Vec<ServerEnvelope>,
    pub misuse_count: u64,
}

#[derive(Default)]
struct CollectorState {
    events: Vec<GameEvent>,
    control: Vec<ServerEnvelope>,
    type_counts: HashMap<String, u64>,
    misuse_count: u64,
}

fn record(state: &Mutex<CollectorState>, envelope: ServerEnvelope) {
    let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    match envelope {
        ServerEnvelope::Event { payload } => {
            let event = GameEvent::from_stream_payload(&payload);
            *state.type_counts.entry(event.event_type.clone()).or_insert(0) += 1;
            state.events.push(event);
        }
        ServerEnvelope::Unknown { .. } => {
            state.misuse_count = state.misuse_count.saturating_add(1);
            state.control.push(envelope);
        }
        other => state.control.push(other),
    }
}

/// Handle to a spawned collector task.
pub struct CollectorHandle<S> {
    state: Arc<Mutex<CollectorState>>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<(S, CollectorExit)>,
}

impl<S: EnvelopeSource + 'static> CollectorHandle<S> {
    /// Spawns the collector loop on its own task. `preload` carries any
    /// envelopes the controller drained while waiting for the subscription
    /// acknowledgment, so nothing observed before the handoff is lost.
    pub fn spawn(
        mut source: S,
        preload: Vec<ServerEnvelope>,
        receive_timeout: Duration,
    ) -> Self {
        let state = Arc::new(Mutex::new(CollectorState::default()));
        for envelope in preload {
            record(&state, envelope);
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let loop_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            let exit = loop {
                if *stop_rx.borrow() {
                    break CollectorExit::Stopped;
                }
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break CollectorExit::Stopped;
                        }
                    }
                    received = source.next_envelope(receive_timeout) => match received {
                        Ok(envelope) => record(&loop_state, envelope),
                        Err(TransportError::Timeout) => {
                            // No data this cycle; keep polling.
                        }
                        Err(TransportError::Closed) => break CollectorExit::SourceClosed,
                        Err(error) => {
                            tracing::warn!(%error, "collector receive failed");
                            break CollectorExit::SourceClosed;
                        }
                    },
                }
            };
            tracing::debug!(?exit, "collector loop exited");
            (source, exit)
        });

        Self {
            state,
            stop_tx,
            task,
        }
    }

    /// Point-in-time snapshot; never blocks the receive loop beyond one
    /// short lock hold.
    pub fn snapshot(&self) -> CollectorSnapshot {
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        CollectorSnapshot {
            buffer_len: state.events.len(),
            type_counts: state.type_counts.clone(),
            control_count: state.control.len(),
            misuse_count: state.misuse_count,
        }
    }

    /// Signals cooperative shutdown, joins the task, and returns the
    /// accumulated output plus the source so the caller can close it.
    pub async fn stop(
        self,
    ) -> Result<(CollectorOutput, S, CollectorExit), tokio::task::JoinError> {
        // Send can only fail when the loop already exited on its own.
        let _ = self.stop_tx.send(true);
        let (source, exit) = self.task.await?;
        let state = Arc::try_unwrap(self.state)
            .map(|mutex| mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()))
            .unwrap_or_else(|shared| {
                let state = shared
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                CollectorState {
                    events: state.events.clone(),
                    control: state.control.clone(),
                    type_counts: state.type_counts.clone(),
                    misuse_count: state.misuse_count,
                }
            });
        let output = CollectorOutput {
            events: state.events,
            control: state.control,
            misuse_count: state.misuse_count,
        };
        Ok((output, source, exit))
    }
}
