use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::TimerConfig;
use crate::error::{Result, SessionError};
use crate::models::{
    ActivityEvent, ActivityKind, BreakKind, CycleCompletion, CycleId, CycleKind,
    InterruptionSource, PomodoroCycle, Session, SessionBreak, SessionEnd, SessionId,
    SessionPatch, SessionState,
};
use crate::scoring::{self, ScoreInputs};
use crate::timer::TimerState;

use super::ledger::ActivityLedger;
use super::pomodoro::CycleManager;

/// What `end` hands back: the finalized record, plus the persist failure if
/// storage rejected the final write. The record is never discarded on a
/// storage failure; callers retry the persist with the value they hold.
#[derive(Debug, Serialize)]
pub struct EndOutcome {
    pub session: Session,
    #[serde(skip)]
    pub persist_error: Option<SessionError>,
}

/// Owns one session's lifecycle and is the sole writer of its timing fields.
///
/// Every method takes the current time as a parameter; the surrounding task
/// supplies `Utc::now()`, and tests supply fixed instants.
pub(crate) struct SessionMachine {
    session: Session,
    ledger: ActivityLedger,
    breaks: Vec<SessionBreak>,
    cycles: CycleManager,
    cycle_xp: u64,
    activity_count: u64,
    last_activity_at: DateTime<Utc>,
    last_accounted_at: DateTime<Utc>,
    paused_at: Option<DateTime<Utc>>,
    config: TimerConfig,
}

impl SessionMachine {
    pub fn new(session: Session, config: TimerConfig) -> Self {
        let started = session.start_time;
        Self {
            ledger: ActivityLedger::new(config.ledger_window),
            breaks: Vec::new(),
            cycles: CycleManager::new(),
            cycle_xp: 0,
            activity_count: 0,
            last_activity_at: started,
            last_accounted_at: started,
            paused_at: None,
            session,
            config,
        }
    }

    pub fn id(&self) -> SessionId {
        self.session.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_live(&self) -> bool {
        self.session.is_live()
    }

    /// Periodic timekeeping: attribute elapsed time and refresh scores.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if !self.is_live() {
            return;
        }
        self.account(now);
        self.recompute(now);
    }

    pub fn register_activity(&mut self, kind: ActivityKind, now: DateTime<Utc>) -> bool {
        if !self.is_live() || self.paused_at.is_some() {
            return false;
        }

        self.account(now);
        self.last_activity_at = now;
        self.activity_count += 1;

        if let ActivityKind::PageChange { page } = kind {
            self.session.ending_page = Some(page);
            self.session.pages_visited += 1;
        }

        self.push_event(kind, now);
        self.recompute(now);
        true
    }

    pub fn register_interruption(&mut self, source: InterruptionSource, now: DateTime<Utc>) -> bool {
        if !self.is_live() {
            return false;
        }

        self.account(now);
        self.session.interruptions += 1;
        self.push_event(ActivityKind::Interruption { source }, now);
        self.recompute(now);
        true
    }

    pub fn update(&mut self, patch: SessionPatch, now: DateTime<Utc>) -> Result<()> {
        self.require_live()?;
        validate_rating(patch.difficulty_rating, "difficulty_rating")?;
        validate_rating(patch.energy_level, "energy_level")?;
        validate_rating(patch.mood_rating, "mood_rating")?;

        self.account(now);

        if let Some(page) = patch.current_page {
            self.session.ending_page = Some(page);
            self.session.pages_visited += 1;
            self.last_activity_at = now;
            self.activity_count += 1;
            self.push_event(ActivityKind::PageChange { page }, now);
        }
        if let Some(name) = patch.name {
            self.session.name = Some(name);
        }
        if let Some(goals) = patch.goals_achieved {
            self.session.goals_achieved = goals;
        }
        if let Some(rating) = patch.difficulty_rating {
            self.session.difficulty_rating = Some(rating);
        }
        if let Some(level) = patch.energy_level {
            self.session.energy_level = Some(level);
        }
        if let Some(rating) = patch.mood_rating {
            self.session.mood_rating = Some(rating);
        }
        if let Some(notes) = patch.notes {
            self.session.notes = Some(notes);
        }

        self.recompute(now);
        Ok(())
    }

    /// `Active → Paused`; opens the session's planned break.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<SessionBreak> {
        if self.session.state != SessionState::Active {
            return Err(SessionError::InvalidState(format!(
                "cannot pause a session in state {:?}",
                self.session.state
            )));
        }

        self.account(now);
        self.session.state = SessionState::Paused;
        self.paused_at = Some(now);

        let brk = SessionBreak::open(self.session.id, BreakKind::Planned, now);
        self.breaks.push(brk.clone());

        self.push_event(ActivityKind::Pause, now);
        self.recompute(now);
        Ok(brk)
    }

    /// `Paused → Active`; closes the open break and folds it into break time.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<SessionBreak> {
        if self.session.state != SessionState::Paused {
            return Err(SessionError::InvalidState(format!(
                "cannot resume a session in state {:?}",
                self.session.state
            )));
        }

        let closed = self.close_open_break(now).ok_or_else(|| {
            SessionError::InvalidState("paused session has no open break".into())
        })?;

        self.paused_at = None;
        self.last_accounted_at = now;
        self.last_activity_at = now;
        self.session.state = SessionState::Active;

        self.push_event(ActivityKind::Resume, now);
        self.recompute(now);
        Ok(closed)
    }

    /// Finalize the session. Returns the break that was still open, if any,
    /// so the caller can persist its terminal row.
    pub fn end(&mut self, final_data: SessionEnd, now: DateTime<Utc>) -> Result<Option<SessionBreak>> {
        self.require_live()?;
        validate_rating(final_data.difficulty_rating, "difficulty_rating")?;
        validate_rating(final_data.energy_level, "energy_level")?;
        validate_rating(final_data.mood_rating, "mood_rating")?;

        self.account(now);
        let closed = self.close_open_break(now);
        self.paused_at = None;

        if let Some(page) = final_data.ending_page {
            self.session.ending_page = Some(page);
        }
        if let Some(goals) = final_data.goals_achieved {
            self.session.goals_achieved = goals;
        }
        if let Some(rating) = final_data.difficulty_rating {
            self.session.difficulty_rating = Some(rating);
        }
        if let Some(level) = final_data.energy_level {
            self.session.energy_level = Some(level);
        }
        if let Some(rating) = final_data.mood_rating {
            self.session.mood_rating = Some(rating);
        }
        if let Some(notes) = final_data.notes {
            self.session.notes = Some(notes);
        }

        self.session.state = SessionState::Ended;
        self.session.end_time = Some(now);

        // Final active time is the wall-clock remainder after idle and break
        // time, but never more than ticking attributed: idle capped away by
        // a machine-sleep gap must not resurface as active time.
        let wall_ms = (now - self.session.start_time).num_milliseconds().max(0) as u64;
        let derived = wall_ms.saturating_sub(self.session.idle_ms + self.session.break_ms);
        self.session.active_ms = self.session.active_ms.min(derived);

        self.recompute(now);

        let active_minutes = self.session.active_ms as f64 / 60_000.0;
        let quality = 1.0 + self.session.focus_score / 100.0;
        self.session.xp_earned = (active_minutes * quality).round() as u64 + self.cycle_xp;

        Ok(closed)
    }

    pub fn start_cycle(
        &mut self,
        cycle_number: u32,
        kind: CycleKind,
        planned_ms: u64,
        now: DateTime<Utc>,
    ) -> Result<PomodoroCycle> {
        if self.session.state != SessionState::Active {
            return Err(SessionError::InvalidState(format!(
                "pomodoro cycles require an active session, not {:?}",
                self.session.state
            )));
        }

        self.cycles
            .start(self.session.id, cycle_number, kind, planned_ms, now)
    }

    /// Completion reports into the session here; nothing else touches the
    /// session's cycle count or XP.
    pub fn complete_cycle(
        &mut self,
        cycle_id: CycleId,
        completion: CycleCompletion,
        now: DateTime<Utc>,
    ) -> Result<PomodoroCycle> {
        self.require_live()?;
        validate_rating(completion.effectiveness_rating, "effectiveness_rating")?;
        validate_rating(completion.focus_rating, "focus_rating")?;

        let cycle = self.cycles.complete(cycle_id, &completion, now)?;
        self.session.pomodoro_cycles += 1;
        self.cycle_xp += cycle.xp_earned;
        self.recompute(now);
        Ok(cycle)
    }

    pub fn timer_state(&self, now: DateTime<Utc>) -> TimerState {
        let elapsed_ms = self.working_elapsed_ms(now);
        let since_activity = (now - self.last_activity_at).num_milliseconds().max(0) as u64;
        let is_paused = self.paused_at.is_some();
        let is_idle =
            !is_paused && since_activity > self.config.idle_threshold.as_millis() as u64;

        TimerState {
            session_id: self.session.id,
            elapsed_seconds: elapsed_ms / 1000,
            active_seconds: self.session.active_ms / 1000,
            idle_seconds: self.session.idle_ms / 1000,
            break_seconds: self.session.break_ms / 1000,
            planned_seconds: self.session.planned_ms / 1000,
            is_paused,
            is_idle,
            last_activity_at: self.last_activity_at,
            activity_count: self.activity_count,
            interruptions: self.session.interruptions,
            pomodoro_cycles: self.session.pomodoro_cycles,
            focus_score: self.session.focus_score,
            productivity_score: self.session.productivity_score,
            progress_percent: (elapsed_ms as f64 / self.session.planned_ms.max(1) as f64
                * 100.0)
                .min(100.0),
        }
    }

    /// Attribute the interval since the last accounting point to exactly one
    /// bucket. Paused spans are skipped here; they become break time when
    /// the open break closes. Gaps past the idle threshold land in idle
    /// time, capped so one long gap (machine sleep) cannot flood the bucket.
    fn account(&mut self, now: DateTime<Utc>) {
        let delta = (now - self.last_accounted_at).num_milliseconds();
        if delta <= 0 {
            return;
        }
        self.last_accounted_at = now;

        if self.paused_at.is_some() {
            return;
        }

        let delta = delta as u64;
        let since_activity = (now - self.last_activity_at).num_milliseconds().max(0) as u64;
        if since_activity > self.config.idle_threshold.as_millis() as u64 {
            let cap = self.config.idle_cap.as_millis() as u64;
            self.session.idle_ms += delta.min(cap);
        } else {
            self.session.active_ms += delta;
        }
    }

    fn recompute(&mut self, now: DateTime<Utc>) {
        let inputs = ScoreInputs {
            active_ms: self.session.active_ms,
            idle_ms: self.session.idle_ms,
            break_ms: self.session.break_ms,
            interruptions: self.session.interruptions,
            completed_cycles: self.cycles.completed_count(),
            pages_completed: self.session.pages_completed(),
            goals_set: self.session.goals_set.len(),
            goals_achieved: self.session.goals_achieved.len(),
            mean_event_gap_secs: self.ledger.mean_gap_secs(),
            breaks: &self.breaks,
        };

        let focus = scoring::focus_score(&inputs, &self.config.score);
        let productivity = scoring::productivity_score(&inputs, &self.config.score, focus);

        self.session.focus_score = focus;
        self.session.productivity_score = productivity;
        self.session.updated_at = now;
    }

    fn push_event(&mut self, kind: ActivityKind, now: DateTime<Utc>) {
        self.ledger.append(ActivityEvent {
            session_id: self.session.id,
            timestamp: now,
            kind,
        });
    }

    fn close_open_break(&mut self, now: DateTime<Utc>) -> Option<SessionBreak> {
        let open = self.breaks.iter_mut().rev().find(|brk| brk.is_open())?;
        open.ended_at = Some(now);
        let closed = open.clone();
        if let Some(duration) = closed.duration_ms() {
            self.session.break_ms += duration;
        }
        Some(closed)
    }

    fn working_elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        let until = self.paused_at.or(self.session.end_time).unwrap_or(now);
        let wall = (until - self.session.start_time).num_milliseconds().max(0) as u64;
        wall.saturating_sub(self.session.break_ms)
    }

    fn require_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(SessionError::InvalidState(format!(
                "session {} already ended",
                self.session.id
            )))
        }
    }
}

fn validate_rating(value: Option<u8>, field: &str) -> Result<()> {
    match value {
        Some(rating) if !(1..=5).contains(&rating) => Err(SessionError::InvalidState(format!(
            "{field} must be between 1 and 5, got {rating}"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use crate::error::ErrorKind;
    use crate::models::SessionSpec;

    use super::*;

    fn start_machine() -> (SessionMachine, DateTime<Utc>) {
        let t0 = Utc::now();
        let spec = SessionSpec {
            planned_minutes: 60,
            starting_page: Some(1),
            ..SessionSpec::default()
        };
        let machine = SessionMachine::new(Session::new(spec, t0), TimerConfig::default());
        (machine, t0)
    }

    fn secs(n: i64) -> ChronoDuration {
        ChronoDuration::seconds(n)
    }

    #[test]
    fn steady_activity_counts_as_active_time() {
        let (mut machine, t0) = start_machine();

        for i in 1..=5 {
            assert!(machine.register_activity(ActivityKind::Interaction, t0 + secs(30 * i)));
        }

        let session = machine.session();
        assert_eq!(session.active_ms, 150_000);
        assert_eq!(session.idle_ms, 0);
    }

    #[test]
    fn full_scenario_scores_high_focus() {
        let (mut machine, t0) = start_machine();

        for i in 1..=5 {
            machine.register_activity(ActivityKind::Interaction, t0 + secs(30 * i));
        }

        let end = SessionEnd {
            ending_page: Some(10),
            ..SessionEnd::default()
        };
        machine.end(end, t0 + secs(150)).unwrap();

        let session = machine.session();
        assert!(!session.is_live());
        assert_eq!(session.ending_page, Some(10));
        assert_eq!(session.pages_completed(), 9);
        assert!(
            session.focus_score >= 85.0,
            "focus was {}",
            session.focus_score
        );
    }

    #[test]
    fn idle_gap_is_attributed_to_idle_time() {
        let (mut machine, t0) = start_machine();

        machine.register_activity(ActivityKind::Interaction, t0 + secs(10));
        // Nothing for three minutes; the tick lands past the idle threshold.
        machine.tick(t0 + secs(190));

        let session = machine.session();
        assert_eq!(session.active_ms, 10_000);
        assert_eq!(session.idle_ms, 180_000);
    }

    #[test]
    fn idle_attribution_is_capped_per_gap() {
        let (mut machine, t0) = start_machine();

        machine.register_activity(ActivityKind::Interaction, t0 + secs(10));
        // Two-hour machine-sleep gap; only the cap lands in idle time.
        machine.tick(t0 + secs(7210));

        let session = machine.session();
        assert_eq!(session.idle_ms, 300_000);

        // The dropped remainder must not resurface as active time at end.
        machine.end(SessionEnd::default(), t0 + secs(7211)).unwrap();
        let session = machine.session();
        assert_eq!(session.active_ms, 10_000);
        let wall_ms = 7_211_000;
        assert!(session.active_ms + session.idle_ms + session.break_ms <= wall_ms);
    }

    #[test]
    fn pause_then_resume_moves_only_break_time() {
        let (mut machine, t0) = start_machine();

        machine.register_activity(ActivityKind::Interaction, t0 + secs(60));
        let active_before = machine.session().active_ms;

        machine.pause(t0 + secs(60)).unwrap();
        let resumed = machine.resume(t0 + secs(360)).unwrap();

        let session = machine.session();
        assert_eq!(session.active_ms, active_before);
        assert_eq!(session.break_ms, 300_000);
        assert_eq!(resumed.duration_ms(), Some(300_000));
        assert_eq!(session.state, SessionState::Active);
    }

    #[test]
    fn paused_session_ignores_activity() {
        let (mut machine, t0) = start_machine();
        machine.pause(t0 + secs(10)).unwrap();

        assert!(!machine.register_activity(ActivityKind::Interaction, t0 + secs(20)));
        assert_eq!(machine.session().active_ms, 10_000);
    }

    #[test]
    fn pause_requires_active_and_resume_requires_paused() {
        let (mut machine, t0) = start_machine();

        let err = machine.resume(t0 + secs(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        machine.pause(t0 + secs(2)).unwrap();
        let err = machine.pause(t0 + secs(3)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn end_is_terminal() {
        let (mut machine, t0) = start_machine();
        machine.end(SessionEnd::default(), t0 + secs(60)).unwrap();

        let err = machine.end(SessionEnd::default(), t0 + secs(61)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        assert!(!machine.register_activity(ActivityKind::Interaction, t0 + secs(62)));
        assert!(!machine.register_interruption(InterruptionSource::Unknown, t0 + secs(63)));
    }

    #[test]
    fn ending_while_paused_closes_the_break() {
        let (mut machine, t0) = start_machine();
        machine.register_activity(ActivityKind::Interaction, t0 + secs(60));
        machine.pause(t0 + secs(60)).unwrap();

        let closed = machine.end(SessionEnd::default(), t0 + secs(120)).unwrap();
        assert_eq!(closed.unwrap().duration_ms(), Some(60_000));

        let session = machine.session();
        assert_eq!(session.break_ms, 60_000);
        assert_eq!(session.active_ms, 60_000);
        let wall_ms = 120_000;
        assert!(session.active_ms + session.idle_ms + session.break_ms <= wall_ms);
    }

    #[test]
    fn end_xp_reflects_active_minutes_and_focus() {
        let (mut machine, t0) = start_machine();

        for i in 1..=30 {
            machine.register_activity(ActivityKind::Interaction, t0 + secs(60 * i));
        }
        machine.end(SessionEnd::default(), t0 + secs(1800)).unwrap();

        let session = machine.session();
        // 30 fully-active minutes at focus 100 → 30 × 2.0
        assert_eq!(session.focus_score, 100.0);
        assert_eq!(session.xp_earned, 60);
    }

    #[test]
    fn interruptions_lower_focus_and_count() {
        let (mut machine, t0) = start_machine();
        machine.register_activity(ActivityKind::Interaction, t0 + secs(60));

        assert!(machine.register_interruption(InterruptionSource::PhoneCall, t0 + secs(61)));
        let session = machine.session();
        assert_eq!(session.interruptions, 1);
        assert!(session.focus_score < 100.0);
    }

    #[test]
    fn completed_cycle_reports_into_session() {
        let (mut machine, t0) = start_machine();

        let cycle = machine
            .start_cycle(1, CycleKind::Work, 25 * 60_000, t0 + secs(1))
            .unwrap();
        let completion = CycleCompletion {
            effectiveness_rating: Some(5),
            ..CycleCompletion::default()
        };
        machine
            .complete_cycle(cycle.id, completion, t0 + secs(1501))
            .unwrap();

        let session = machine.session();
        assert_eq!(session.pomodoro_cycles, 1);

        machine.end(SessionEnd::default(), t0 + secs(1502)).unwrap();
        // Cycle XP rides on top of the session's own XP.
        assert!(machine.session().xp_earned >= 17);
    }

    #[test]
    fn cycles_require_an_active_session() {
        let (mut machine, t0) = start_machine();
        machine.pause(t0 + secs(1)).unwrap();

        let err = machine
            .start_cycle(1, CycleKind::Work, 25 * 60_000, t0 + secs(2))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn update_applies_page_and_goal_progress() {
        let (mut machine, t0) = start_machine();

        let patch = SessionPatch {
            current_page: Some(7),
            goals_achieved: Some(vec!["read chapter".into()]),
            difficulty_rating: Some(4),
            ..SessionPatch::default()
        };
        machine.update(patch, t0 + secs(30)).unwrap();

        let session = machine.session();
        assert_eq!(session.ending_page, Some(7));
        assert_eq!(session.pages_visited, 1);
        assert_eq!(session.goals_achieved.len(), 1);
        assert_eq!(session.difficulty_rating, Some(4));
    }

    #[test]
    fn out_of_range_rating_is_rejected() {
        let (mut machine, t0) = start_machine();

        let patch = SessionPatch {
            mood_rating: Some(9),
            ..SessionPatch::default()
        };
        let err = machine.update(patch, t0 + secs(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn timer_state_freezes_elapsed_while_paused() {
        let (mut machine, t0) = start_machine();
        machine.pause(t0 + secs(100)).unwrap();

        let state = machine.timer_state(t0 + secs(500));
        assert!(state.is_paused);
        assert_eq!(state.elapsed_seconds, 100);

        machine.resume(t0 + secs(500)).unwrap();
        let state = machine.timer_state(t0 + secs(600));
        assert!(!state.is_paused);
        // 600s wall minus the 400s break
        assert_eq!(state.elapsed_seconds, 200);
    }
}
