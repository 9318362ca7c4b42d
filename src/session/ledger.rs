use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::models::ActivityEvent;

/// Append-only sequence of a session's activity events.
///
/// Events arrive from the session's own task only, so they are already
/// timestamp-ordered. Old entries are pruned to a rolling window; gap
/// analysis never needs more than recent history.
pub(crate) struct ActivityLedger {
    events: Vec<ActivityEvent>,
    window: ChronoDuration,
}

impl ActivityLedger {
    pub fn new(window: std::time::Duration) -> Self {
        let window = ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::hours(1));
        Self {
            events: Vec::new(),
            window,
        }
    }

    pub fn append(&mut self, event: ActivityEvent) {
        self.prune(event.timestamp);
        self.events.push(event);
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        self.events.retain(|event| event.timestamp > cutoff);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Mean gap in seconds between consecutive events in the window;
    /// `None` with fewer than two events.
    pub fn mean_gap_secs(&self) -> Option<f64> {
        if self.events.len() < 2 {
            return None;
        }

        let total_ms: i64 = self
            .events
            .windows(2)
            .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds().max(0))
            .sum();

        Some(total_ms as f64 / 1000.0 / (self.events.len() - 1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use uuid::Uuid;

    use crate::models::{ActivityEvent, ActivityKind};

    use super::*;

    fn event_at(offset_secs: i64) -> ActivityEvent {
        ActivityEvent {
            session_id: Uuid::nil(),
            timestamp: Utc::now() + ChronoDuration::seconds(offset_secs),
            kind: ActivityKind::Interaction,
        }
    }

    #[test]
    fn mean_gap_requires_two_events() {
        let mut ledger = ActivityLedger::new(Duration::from_secs(3600));
        assert_eq!(ledger.mean_gap_secs(), None);

        ledger.append(event_at(0));
        assert_eq!(ledger.mean_gap_secs(), None);
    }

    #[test]
    fn mean_gap_averages_consecutive_gaps() {
        let mut ledger = ActivityLedger::new(Duration::from_secs(3600));
        ledger.append(event_at(0));
        ledger.append(event_at(30));
        ledger.append(event_at(90));

        let gap = ledger.mean_gap_secs().unwrap();
        assert!((gap - 45.0).abs() < 0.01, "mean gap was {gap}");
    }

    #[test]
    fn old_events_are_pruned() {
        let mut ledger = ActivityLedger::new(Duration::from_secs(60));
        ledger.append(event_at(-300));
        ledger.append(event_at(-200));
        ledger.append(event_at(0));

        assert_eq!(ledger.len(), 1);
    }
}
