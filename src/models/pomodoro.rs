use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CycleId, SessionId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CycleKind {
    Work,
    ShortBreak,
    LongBreak,
}

impl CycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleKind::Work => "work",
            CycleKind::ShortBreak => "short_break",
            CycleKind::LongBreak => "long_break",
        }
    }

    /// XP awarded for completing a cycle of this kind at a neutral rating.
    pub fn base_xp(&self) -> f64 {
        match self {
            CycleKind::Work => 10.0,
            CycleKind::ShortBreak | CycleKind::LongBreak => 5.0,
        }
    }
}

/// One timed work or break interval nested inside a session.
///
/// A cycle either completes or is abandoned; abandoned cycles simply stay
/// incomplete and never count toward completion statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroCycle {
    pub id: CycleId,
    pub session_id: SessionId,
    pub cycle_number: u32,
    pub kind: CycleKind,
    pub planned_ms: u64,
    pub actual_ms: Option<u64>,
    pub completed: bool,
    pub interruptions: u32,
    pub effectiveness_rating: Option<u8>,
    pub focus_rating: Option<u8>,
    pub task_completed: bool,
    pub notes: Option<String>,
    pub xp_earned: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PomodoroCycle {
    pub fn start(
        session_id: SessionId,
        cycle_number: u32,
        kind: CycleKind,
        planned_ms: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            cycle_number,
            kind,
            planned_ms,
            actual_ms: None,
            completed: false,
            interruptions: 0,
            effectiveness_rating: None,
            focus_rating: None,
            task_completed: false,
            notes: None,
            xp_earned: 0,
            started_at: now,
            completed_at: None,
        }
    }
}

/// Quality data reported when a cycle completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleCompletion {
    pub effectiveness_rating: Option<u8>,
    pub focus_rating: Option<u8>,
    pub interruptions: Option<u32>,
    pub task_completed: Option<bool>,
    pub notes: Option<String>,
}
