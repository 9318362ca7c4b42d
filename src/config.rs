use std::time::Duration;

/// How many sessions may be live (Active or Paused) at once.
///
/// `Exclusive` is the classic one-study-session-at-a-time rule; `Unlimited`
/// allows one live session per document or any other caller-side scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPolicy {
    #[default]
    Exclusive,
    Unlimited,
}

/// Tunable thresholds for the per-session timekeeping task.
///
/// None of these are contracts; the defaults mirror the cadence the engine
/// was tuned with, and embedders may override any of them.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Cadence of the background tick.
    pub tick_interval: Duration,

    /// No activity for longer than this counts the session as idle.
    pub idle_threshold: Duration,

    /// Largest interval a single attribution may add to idle time, so a
    /// machine-sleep gap does not land as one huge idle block.
    pub idle_cap: Duration,

    /// Session progress is flushed to the store every N ticks.
    pub persist_every_ticks: u32,

    /// Bounded buffer size for each broadcast observer.
    pub observer_capacity: usize,

    /// Activity events older than this are pruned from the ledger.
    pub ledger_window: Duration,

    pub policy: SessionPolicy,

    pub score: ScoreConfig,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            idle_threshold: Duration::from_secs(120),
            idle_cap: Duration::from_secs(300),
            persist_every_ticks: 10,
            observer_capacity: 32,
            ledger_window: Duration::from_secs(3600),
            policy: SessionPolicy::default(),
            score: ScoreConfig::default(),
        }
    }
}

/// Weights and thresholds for focus/productivity scoring.
#[derive(Debug, Clone)]
pub struct ScoreConfig {
    /// Bonus granted when the mean inter-event gap falls inside the band.
    pub consistency_bonus: f64,
    pub consistency_min_gap_secs: f64,
    pub consistency_max_gap_secs: f64,

    pub pomodoro_bonus_per_cycle: f64,
    pub pomodoro_bonus_cap: f64,

    pub interruption_penalty: f64,
    pub interruption_penalty_cap: f64,

    /// Breaks averaging longer than this (minutes) are penalized per minute
    /// of excess; breaks averaging shorter than `short_break_minutes` are
    /// penalized per missing minute (break-shortening behavior).
    pub long_break_minutes: f64,
    pub short_break_minutes: f64,
    pub long_break_penalty_per_minute: f64,
    pub short_break_penalty_per_minute: f64,
    pub break_penalty_cap: f64,

    pub pages_cap: f64,
    pub efficiency_weight: f64,
    pub goals_weight: f64,
    pub focus_weight: f64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            consistency_bonus: 10.0,
            consistency_min_gap_secs: 30.0,
            consistency_max_gap_secs: 300.0,
            pomodoro_bonus_per_cycle: 3.0,
            pomodoro_bonus_cap: 15.0,
            interruption_penalty: 5.0,
            interruption_penalty_cap: 25.0,
            long_break_minutes: 15.0,
            short_break_minutes: 2.0,
            long_break_penalty_per_minute: 1.5,
            short_break_penalty_per_minute: 5.0,
            break_penalty_cap: 20.0,
            pages_cap: 50.0,
            efficiency_weight: 0.3,
            goals_weight: 20.0,
            focus_weight: 0.2,
        }
    }
}
