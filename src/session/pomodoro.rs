use chrono::{DateTime, Utc};

use crate::error::{Result, SessionError};
use crate::models::{CycleCompletion, CycleId, CycleKind, PomodoroCycle, SessionId};

/// Sequences the Pomodoro cycles nested inside one session.
///
/// Cycles are `Started → Completed` with no cancel state; an abandoned cycle
/// stays incomplete and is excluded from completion statistics.
pub(crate) struct CycleManager {
    cycles: Vec<PomodoroCycle>,
}

impl CycleManager {
    pub fn new() -> Self {
        Self { cycles: Vec::new() }
    }

    pub fn start(
        &mut self,
        session_id: SessionId,
        cycle_number: u32,
        kind: CycleKind,
        planned_ms: u64,
        now: DateTime<Utc>,
    ) -> Result<PomodoroCycle> {
        if let Some(last) = self.cycles.last() {
            if cycle_number <= last.cycle_number {
                return Err(SessionError::InvalidState(format!(
                    "cycle number {cycle_number} does not advance past {}",
                    last.cycle_number
                )));
            }
        }

        let cycle = PomodoroCycle::start(session_id, cycle_number, kind, planned_ms, now);
        self.cycles.push(cycle.clone());
        Ok(cycle)
    }

    pub fn complete(
        &mut self,
        cycle_id: CycleId,
        completion: &CycleCompletion,
        now: DateTime<Utc>,
    ) -> Result<PomodoroCycle> {
        // A completed cycle is terminal; it looks the same as an unknown id.
        let cycle = self
            .cycles
            .iter_mut()
            .find(|cycle| cycle.id == cycle_id && !cycle.completed)
            .ok_or_else(|| SessionError::NotFound(format!("pomodoro cycle {cycle_id}")))?;

        cycle.completed = true;
        cycle.completed_at = Some(now);
        cycle.actual_ms = Some((now - cycle.started_at).num_milliseconds().max(0) as u64);
        cycle.effectiveness_rating = completion.effectiveness_rating;
        cycle.focus_rating = completion.focus_rating;
        if let Some(interruptions) = completion.interruptions {
            cycle.interruptions = interruptions;
        }
        if let Some(task_completed) = completion.task_completed {
            cycle.task_completed = task_completed;
        }
        if let Some(notes) = &completion.notes {
            cycle.notes = Some(notes.clone());
        }

        let rating = f64::from(completion.effectiveness_rating.unwrap_or(3));
        cycle.xp_earned = (cycle.kind.base_xp() * rating / 3.0).round() as u64;

        Ok(cycle.clone())
    }

    pub fn completed_count(&self) -> u32 {
        self.cycles.iter().filter(|cycle| cycle.completed).count() as u32
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    use crate::error::ErrorKind;

    use super::*;

    #[test]
    fn work_cycle_at_top_rating_earns_seventeen_xp() {
        let mut manager = CycleManager::new();
        let now = Utc::now();
        let cycle = manager
            .start(Uuid::new_v4(), 1, CycleKind::Work, 25 * 60_000, now)
            .unwrap();

        let completion = CycleCompletion {
            effectiveness_rating: Some(5),
            ..CycleCompletion::default()
        };
        let done = manager
            .complete(cycle.id, &completion, now + ChronoDuration::minutes(25))
            .unwrap();

        assert!(done.completed);
        assert_eq!(done.xp_earned, 17);
        assert_eq!(done.actual_ms, Some(25 * 60_000));
    }

    #[test]
    fn completing_twice_reports_not_found() {
        let mut manager = CycleManager::new();
        let now = Utc::now();
        let cycle = manager
            .start(Uuid::new_v4(), 1, CycleKind::Work, 25 * 60_000, now)
            .unwrap();

        manager
            .complete(cycle.id, &CycleCompletion::default(), now)
            .unwrap();
        let err = manager
            .complete(cycle.id, &CycleCompletion::default(), now)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn cycle_numbers_must_advance() {
        let mut manager = CycleManager::new();
        let now = Utc::now();
        let session_id = Uuid::new_v4();
        manager
            .start(session_id, 2, CycleKind::Work, 25 * 60_000, now)
            .unwrap();

        let err = manager
            .start(session_id, 2, CycleKind::ShortBreak, 5 * 60_000, now)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn break_cycle_defaults_to_neutral_rating() {
        let mut manager = CycleManager::new();
        let now = Utc::now();
        let cycle = manager
            .start(Uuid::new_v4(), 1, CycleKind::ShortBreak, 5 * 60_000, now)
            .unwrap();

        let done = manager
            .complete(cycle.id, &CycleCompletion::default(), now)
            .unwrap();
        assert_eq!(done.xp_earned, 5);
    }
}
