use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::event::GameEvent;

/// Which source the reconciled log came from. Source selection is
/// all-or-nothing: interleaving two independently fetched logs cannot be
/// proven consistent without per-event payload equality the server does not
/// guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// The REST historical log; complete and correctly ordered by server
    /// contract.
    Authoritative,
    /// The live buffer, used because the REST fetch failed or was empty.
    BestEffort,
}

impl Provenance {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Authoritative => "authoritative",
            Self::BestEffort => "best-effort, live-only",
        }
    }
}

/// The terminal artifact of a collection run: one de-duplicated event list
/// ordered ascending by sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledLog {
    pub events: Vec<GameEvent>,
    pub provenance: Provenance,
}

/// Sequence numbers present in only one of the two sources, for diagnostics.
/// Identity is seq equality; payload shape may legitimately differ between
/// the REST and WebSocket representations of the same logical event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Divergence {
    pub only_rest: Vec<u64>,
    pub only_live: Vec<u64>,
}

impl Divergence {
    pub fn is_empty(&self) -> bool {
        self.only_rest.is_empty() && self.only_live.is_empty()
    }
}

/// Produces the final event list from the authoritative REST fetch and the
/// live-collected buffer.
///
/// Pass `None` when the fetch failed or returned malformed data; the
/// recoverable fallback is the live buffer, deduplicated by seq (first-seen
/// wins), sorted ascending where a seq exists, with unsequenced events kept
/// in arrival order after all sequenced ones. Idempotent: no hidden state.
// Sequenced events ascending, unsequenced after all of them; stable sort
// keeps unsequenced events in their original relative order.
fn seq_order_key(event: &GameEvent) -> (u8, u64) {
    match event.seq {
        Some(seq) => (0, seq),
        None => (1, 0),
    }
}

pub fn reconcile(rest: Option<Vec<GameEvent>>, live: &[GameEvent]) -> ReconciledLog {
    match rest {
        Some(rows) if !rows.is_empty() => {
            let mut events = rows;
            events.sort_by_key(seq_order_key);
            tracing::debug!(events = events.len(), "reconciled from authoritative log");
            ReconciledLog {
                events,
                provenance: Provenance::Authoritative,
            }
        }
        fetched => {
            if fetched.is_some() {
                tracing::warn!("authoritative log empty, falling back to live buffer");
            } else {
                tracing::warn!("authoritative fetch unavailable, falling back to live buffer");
            }
            ReconciledLog {
                events: best_effort_order(live),
                provenance: Provenance::BestEffort,
            }
        }
    }
}

fn best_effort_order(live: &[GameEvent]) -> Vec<GameEvent> {
    let mut seen = HashSet::new();
    let mut sequenced = Vec::new();
    let mut unsequenced = Vec::new();
    for event in live {
        match event.seq {
            Some(seq) => {
                if seen.insert(seq) {
                    sequenced.push(event.clone());
                }
            }
            None => unsequenced.push(event.clone()),
        }
    }
    sequenced.sort_by_key(seq_order_key);
    sequenced.extend(unsequenced);
    sequenced
}

/// Compares both sources by seq for diagnostics; never feeds reporting.
pub fn divergence(rest: &[GameEvent], live: &[GameEvent]) -> Divergence {
    let rest_seqs: HashSet<u64> = rest.iter().filter_map(|event| event.seq).collect();
    let live_seqs: HashSet<u64> = live.iter().filter_map(|event| event.seq).collect();

    let mut only_rest: Vec<u64> = rest_seqs.difference(&live_seqs).copied().collect();
    let mut only_live: Vec<u64> = live_seqs.difference(&rest_seqs).copied().collect();
    only_rest.sort_unstable();
    only_live.sort_unstable();

    Divergence {
        only_rest,
        only_live,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{divergence, reconcile, Provenance};
    use crate::event::GameEvent;

    fn event(seq: Option<u64>, event_type: &str) -> GameEvent {
        GameEvent {
            seq,
            event_type: event_type.to_string(),
            actor_user_id: None,
            payload: json!({}),
        }
    }

    fn session_rest_log() -> Vec<GameEvent> {
        (1..=10)
            .map(|seq| {
                let event_type = if matches!(seq, 3 | 5 | 7 | 9) {
                    "public.chat"
                } else {
                    "phase.changed"
                };
                event(Some(seq), event_type)
            })
            .collect()
    }

    #[test]
    fn functional_rest_success_wins_regardless_of_live_buffer() {
        let mut rest = session_rest_log();
        rest.reverse();
        let live = vec![event(Some(99), "public.chat")];

        let log = reconcile(Some(rest), &live);
        assert_eq!(log.provenance, Provenance::Authoritative);
        let seqs: Vec<_> = log.events.iter().filter_map(|event| event.seq).collect();
        assert_eq!(seqs, (1..=10).collect::<Vec<u64>>());
    }

    #[test]
    fn functional_fetch_failure_falls_back_to_sorted_live_buffer() {
        let live = vec![
            event(Some(7), "public.chat"),
            event(Some(5), "phase.changed"),
            event(None, "local.note"),
            event(Some(6), "public.chat"),
        ];
        let log = reconcile(None, &live);
        assert_eq!(log.provenance, Provenance::BestEffort);
        let seqs: Vec<_> = log.events.iter().map(|event| event.seq).collect();
        // Sequenced ascending, unsequenced after them in arrival order.
        assert_eq!(seqs, vec![Some(5), Some(6), Some(7), None]);
    }

    #[test]
    fn regression_authoritative_rows_missing_seq_sort_after_sequenced_ones() {
        let rest = vec![
            event(Some(2), "public.chat"),
            event(None, "audit.note"),
            event(Some(1), "game.started"),
        ];
        let log = reconcile(Some(rest), &[]);
        assert_eq!(log.provenance, Provenance::Authoritative);
        let seqs: Vec<_> = log.events.iter().map(|event| event.seq).collect();
        assert_eq!(seqs, vec![Some(1), Some(2), None]);
    }

    #[test]
    fn functional_empty_rest_log_is_treated_as_unavailable() {
        let live = vec![event(Some(2), "public.chat")];
        let log = reconcile(Some(Vec::new()), &live);
        assert_eq!(log.provenance, Provenance::BestEffort);
        assert_eq!(log.events.len(), 1);
    }

    #[test]
    fn scenario_mid_session_subscription_with_and_without_rest() {
        // REST has seq 1..10; the live subscription started at last_seq = 4
        // and only observed 5..10.
        let rest = session_rest_log();
        let live: Vec<GameEvent> = (5..=10)
            .map(|seq| event(Some(seq), if seq % 2 == 1 { "public.chat" } else { "phase.changed" }))
            .collect();

        let with_rest = reconcile(Some(rest.clone()), &live);
        assert_eq!(with_rest.provenance, Provenance::Authoritative);
        assert_eq!(with_rest.events.len(), 10);

        let without_rest = reconcile(None, &live);
        assert_eq!(without_rest.provenance, Provenance::BestEffort);
        let seqs: Vec<_> = without_rest
            .events
            .iter()
            .filter_map(|event| event.seq)
            .collect();
        assert_eq!(seqs, (5..=10).collect::<Vec<u64>>());
    }

    #[test]
    fn scenario_duplicate_live_delivery_is_deduplicated_first_seen_wins() {
        let mut first = event(Some(4), "public.chat");
        first.payload = json!({"message": "first delivery"});
        let mut second = event(Some(4), "public.chat");
        second.payload = json!({"message": "retry delivery"});

        let live = vec![first.clone(), second];
        let log = reconcile(None, &live);
        assert_eq!(log.events.len(), 1);
        assert_eq!(log.events[0].payload["message"], "first delivery");

        // REST-backed reconciliation is unaffected by live duplicates.
        let rest_backed = reconcile(Some(session_rest_log()), &live);
        assert_eq!(rest_backed.events.len(), 10);
    }

    #[test]
    fn regression_reconcile_is_idempotent() {
        let rest = session_rest_log();
        let live = vec![event(Some(7), "public.chat"), event(Some(7), "public.chat")];
        assert_eq!(
            reconcile(Some(rest.clone()), &live),
            reconcile(Some(rest), &live)
        );
        assert_eq!(reconcile(None, &live), reconcile(None, &live));
    }

    #[test]
    fn unit_divergence_reports_seqs_unique_to_each_source() {
        let rest = vec![event(Some(1), "a"), event(Some(2), "b"), event(Some(3), "c")];
        let live = vec![event(Some(2), "b"), event(Some(4), "d"), event(None, "x")];
        let diff = divergence(&rest, &live);
        assert_eq!(diff.only_rest, vec![1, 3]);
        assert_eq!(diff.only_live, vec![4]);
        assert!(!diff.is_empty());

        assert!(divergence(&rest, &rest).is_empty());
    }
}
