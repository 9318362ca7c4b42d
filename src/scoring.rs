//! Focus and productivity scoring.
//!
//! Pure functions over a session's time buckets, break history, and event
//! gaps; every weight and threshold comes from [`ScoreConfig`], so callers
//! can retune without touching the formulas.

use crate::config::ScoreConfig;
use crate::models::SessionBreak;

/// Everything the scorer looks at, borrowed from the session machine.
#[derive(Debug, Clone)]
pub struct ScoreInputs<'a> {
    pub active_ms: u64,
    pub idle_ms: u64,
    pub break_ms: u64,
    pub interruptions: u32,
    pub completed_cycles: u32,
    pub pages_completed: u32,
    pub goals_set: usize,
    pub goals_achieved: usize,
    /// Mean gap between consecutive ledger events, when known.
    pub mean_event_gap_secs: Option<f64>,
    pub breaks: &'a [SessionBreak],
}

impl ScoreInputs<'_> {
    fn total_minutes(&self) -> f64 {
        let total_ms = self.active_ms + self.idle_ms + self.break_ms;
        (total_ms as f64 / 60_000.0).max(1.0)
    }

    fn active_minutes(&self) -> f64 {
        self.active_ms as f64 / 60_000.0
    }
}

/// Active share of attributed time, as a percentage.
pub fn efficiency(active_ms: u64, idle_ms: u64, break_ms: u64) -> f64 {
    let total = active_ms + idle_ms + break_ms;
    if total == 0 {
        return 0.0;
    }
    active_ms as f64 / total as f64 * 100.0
}

/// Focus score in [0, 100].
///
/// Active ratio carries the score; steady event cadence and completed
/// Pomodoro cycles add bonuses, while interruptions and degenerate break
/// patterns (too long or compulsively short) subtract capped penalties.
pub fn focus_score(inputs: &ScoreInputs<'_>, config: &ScoreConfig) -> f64 {
    let active_ratio = (inputs.active_minutes() / inputs.total_minutes()).min(1.0);

    let consistency_bonus = match inputs.mean_event_gap_secs {
        Some(gap)
            if gap >= config.consistency_min_gap_secs
                && gap <= config.consistency_max_gap_secs =>
        {
            config.consistency_bonus
        }
        _ => 0.0,
    };

    let pomodoro_bonus = (f64::from(inputs.completed_cycles) * config.pomodoro_bonus_per_cycle)
        .min(config.pomodoro_bonus_cap);

    let interruption_penalty = (f64::from(inputs.interruptions) * config.interruption_penalty)
        .min(config.interruption_penalty_cap);

    let break_penalty = break_penalty(inputs.breaks, config);

    clamp_score(
        active_ratio * 100.0 + consistency_bonus + pomodoro_bonus
            - break_penalty
            - interruption_penalty,
    )
}

/// Productivity score in [0, 100]: pages completed (capped), efficiency,
/// goal completion, and a slice of the focus score.
pub fn productivity_score(inputs: &ScoreInputs<'_>, config: &ScoreConfig, focus: f64) -> f64 {
    let pages = f64::from(inputs.pages_completed).min(config.pages_cap);

    let efficiency = efficiency(inputs.active_ms, inputs.idle_ms, inputs.break_ms);

    let goals_ratio = if inputs.goals_set == 0 {
        0.0
    } else {
        (inputs.goals_achieved as f64 / inputs.goals_set as f64).min(1.0)
    };

    clamp_score(
        pages
            + efficiency * config.efficiency_weight
            + goals_ratio * config.goals_weight
            + focus * config.focus_weight,
    )
}

fn break_penalty(breaks: &[SessionBreak], config: &ScoreConfig) -> f64 {
    let durations: Vec<u64> = breaks.iter().filter_map(|b| b.duration_ms()).collect();
    if durations.is_empty() {
        return 0.0;
    }

    let mean_minutes =
        durations.iter().sum::<u64>() as f64 / durations.len() as f64 / 60_000.0;

    let penalty = if mean_minutes > config.long_break_minutes {
        (mean_minutes - config.long_break_minutes) * config.long_break_penalty_per_minute
    } else if mean_minutes < config.short_break_minutes {
        (config.short_break_minutes - mean_minutes) * config.short_break_penalty_per_minute
    } else {
        0.0
    };

    penalty.min(config.break_penalty_cap)
}

fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}
