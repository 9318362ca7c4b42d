use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::SessionId;

/// Point-in-time view of a live session's timer.
///
/// Transient: rebuilt from the session machine on every snapshot, never
/// persisted. Field names are the wire contract for `timer_update` messages,
/// so serde stays at default snake_case here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimerState {
    pub session_id: SessionId,
    /// Working elapsed time: wall clock since start minus break time.
    pub elapsed_seconds: u64,
    pub active_seconds: u64,
    pub idle_seconds: u64,
    pub break_seconds: u64,
    pub planned_seconds: u64,
    pub is_paused: bool,
    pub is_idle: bool,
    pub last_activity_at: DateTime<Utc>,
    pub activity_count: u64,
    pub interruptions: u32,
    pub pomodoro_cycles: u32,
    pub focus_score: f64,
    pub productivity_score: f64,
    pub progress_percent: f64,
}
