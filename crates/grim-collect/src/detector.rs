use std::time::Duration;

use crate::collector::CollectorSnapshot;

/// Stop once `count` events of `event_type` have been observed.
///
/// The quorum is a named approximation: the harness cannot know in advance
/// how many events a live, AI-narrated session will produce, so "enough
/// chat messages" stands in for "enough activity happened". A stopped
/// collection is a representative sample, not a complete one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quorum {
    pub event_type: String,
    pub count: u64,
}

/// Disjunction of stop conditions, evaluated on a fixed polling interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopPolicy {
    /// Stop immediately once this event type is observed.
    pub terminal_event_type: Option<String>,
    /// Stop (after a grace window) once the quorum is reached.
    pub quorum: Option<Quorum>,
    /// Hard wall-clock budget; a normal exit path, not a failure.
    pub hard_budget: Duration,
    /// Extra collection window after a quorum trigger, to catch closely
    /// following events and reduce truncation at the quorum boundary.
    pub grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TerminalEvent,
    QuorumReached,
    BudgetExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    Continue,
    /// Stop now.
    Stop(StopReason),
    /// Stop after the policy's grace window.
    StopAfterGrace(StopReason),
}

impl StopPolicy {
    /// Pure function of the snapshot and elapsed time; the controller polls
    /// it every interval and acts on the first non-`Continue` decision.
    pub fn evaluate(&self, snapshot: &CollectorSnapshot, elapsed: Duration) -> StopDecision {
        if let Some(terminal) = self.terminal_event_type.as_deref() {
            if snapshot.has_seen(terminal) {
                return StopDecision::Stop(StopReason::TerminalEvent);
            }
        }

        if elapsed >= self.hard_budget {
            return StopDecision::Stop(StopReason::BudgetExhausted);
        }

        if let Some(quorum) = self.quorum.as_ref() {
            if snapshot.count_of(&quorum.event_type) >= quorum.count {
                return StopDecision::StopAfterGrace(StopReason::QuorumReached);
            }
        }

        StopDecision::Continue
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Quorum, StopDecision, StopPolicy, StopReason};
    use crate::collector::CollectorSnapshot;

    fn snapshot_with(event_type: &str, count: u64) -> CollectorSnapshot {
        let mut snapshot = CollectorSnapshot::default();
        snapshot.type_counts.insert(event_type.to_string(), count);
        snapshot.buffer_len = count as usize;
        snapshot
    }

    fn chat_policy(quorum: u64) -> StopPolicy {
        StopPolicy {
            terminal_event_type: Some("game.ended".to_string()),
            quorum: Some(Quorum {
                event_type: "public.chat".to_string(),
                count: quorum,
            }),
            hard_budget: Duration::from_secs(60),
            grace: Duration::from_secs(5),
        }
    }

    #[test]
    fn unit_quorum_never_fires_below_the_configured_count() {
        let policy = chat_policy(4);
        for count in 0..4 {
            assert_eq!(
                policy.evaluate(&snapshot_with("public.chat", count), Duration::from_secs(10)),
                StopDecision::Continue,
                "quorum must not fire at {count} events"
            );
        }
    }

    #[test]
    fn functional_quorum_fires_with_grace_at_the_configured_count() {
        let policy = chat_policy(4);
        assert_eq!(
            policy.evaluate(&snapshot_with("public.chat", 4), Duration::from_secs(10)),
            StopDecision::StopAfterGrace(StopReason::QuorumReached)
        );
        assert_eq!(
            policy.evaluate(&snapshot_with("public.chat", 9), Duration::from_secs(10)),
            StopDecision::StopAfterGrace(StopReason::QuorumReached)
        );
    }

    #[test]
    fn functional_budget_fires_exactly_at_the_configured_budget() {
        let policy = chat_policy(4);
        let empty = CollectorSnapshot::default();
        assert_eq!(
            policy.evaluate(&empty, Duration::from_secs(60) - Duration::from_millis(1)),
            StopDecision::Continue
        );
        assert_eq!(
            policy.evaluate(&empty, Duration::from_secs(60)),
            StopDecision::Stop(StopReason::BudgetExhausted)
        );
    }

    #[test]
    fn functional_terminal_event_short_circuits_everything_else() {
        let policy = chat_policy(1);
        let mut snapshot = snapshot_with("public.chat", 3);
        snapshot.type_counts.insert("game.ended".to_string(), 1);
        assert_eq!(
            policy.evaluate(&snapshot, Duration::from_secs(120)),
            StopDecision::Stop(StopReason::TerminalEvent)
        );
    }

    #[test]
    fn regression_budget_outranks_quorum_once_elapsed() {
        // At the budget boundary the run is over regardless of quorum state;
        // there is no grace window left to spend.
        let policy = chat_policy(4);
        assert_eq!(
            policy.evaluate(&snapshot_with("public.chat", 4), Duration::from_secs(60)),
            StopDecision::Stop(StopReason::BudgetExhausted)
        );
    }

    #[test]
    fn unit_policy_without_quorum_or_terminal_only_times_out() {
        let policy = StopPolicy {
            terminal_event_type: None,
            quorum: None,
            hard_budget: Duration::from_secs(30),
            grace: Duration::ZERO,
        };
        assert_eq!(
            policy.evaluate(&snapshot_with("public.chat", 100), Duration::from_secs(29)),
            StopDecision::Continue
        );
        assert_eq!(
            policy.evaluate(&CollectorSnapshot::default(), Duration::from_secs(30)),
            StopDecision::Stop(StopReason::BudgetExhausted)
        );
    }
}
