use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SessionId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionKind {
    Study,
    Exercise,
    Review,
    Research,
}

impl Default for SessionKind {
    fn default() -> Self {
        SessionKind::Study
    }
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Study => "study",
            SessionKind::Exercise => "exercise",
            SessionKind::Review => "review",
            SessionKind::Research => "research",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Active,
    Paused,
    Ended,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "Active",
            SessionState::Paused => "Paused",
            SessionState::Ended => "Ended",
        }
    }
}

/// One bounded study attempt, from start to end.
///
/// The record is mutated only by its session's state machine while live and
/// becomes immutable once `end_time` is set. Time buckets are milliseconds
/// and monotonically non-decreasing; their sum never exceeds the wall-clock
/// span of the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub document_id: Option<Uuid>,
    pub topic_id: Option<Uuid>,
    pub kind: SessionKind,
    pub name: Option<String>,
    pub state: SessionState,
    pub planned_ms: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub active_ms: u64,
    pub idle_ms: u64,
    pub break_ms: u64,
    pub starting_page: Option<u32>,
    pub ending_page: Option<u32>,
    pub pages_visited: u32,
    pub pomodoro_cycles: u32,
    pub interruptions: u32,
    pub focus_score: f64,
    pub productivity_score: f64,
    pub difficulty_rating: Option<u8>,
    pub energy_level: Option<u8>,
    pub mood_rating: Option<u8>,
    pub notes: Option<String>,
    pub goals_set: Vec<String>,
    pub goals_achieved: Vec<String>,
    pub xp_earned: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(spec: SessionSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id: spec.document_id,
            topic_id: spec.topic_id,
            kind: spec.kind,
            name: spec.name,
            state: SessionState::Active,
            planned_ms: u64::from(spec.planned_minutes.max(1)) * 60_000,
            start_time: now,
            end_time: None,
            active_ms: 0,
            idle_ms: 0,
            break_ms: 0,
            starting_page: spec.starting_page,
            ending_page: None,
            pages_visited: 0,
            pomodoro_cycles: 0,
            interruptions: 0,
            focus_score: 0.0,
            productivity_score: 0.0,
            difficulty_rating: None,
            energy_level: None,
            mood_rating: None,
            notes: None,
            goals_set: spec.goals_set,
            goals_achieved: Vec::new(),
            xp_earned: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_live(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn pages_completed(&self) -> u32 {
        match (self.starting_page, self.ending_page) {
            (Some(start), Some(end)) => end.saturating_sub(start),
            _ => 0,
        }
    }
}

/// Parameters for starting a new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSpec {
    pub document_id: Option<Uuid>,
    pub topic_id: Option<Uuid>,
    pub kind: SessionKind,
    pub name: Option<String>,
    pub planned_minutes: u32,
    pub starting_page: Option<u32>,
    pub goals_set: Vec<String>,
}

impl Default for SessionSpec {
    fn default() -> Self {
        Self {
            document_id: None,
            topic_id: None,
            kind: SessionKind::default(),
            name: None,
            planned_minutes: 60,
            starting_page: None,
            goals_set: Vec::new(),
        }
    }
}

/// Partial update applied to a live session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    pub current_page: Option<u32>,
    pub name: Option<String>,
    pub goals_achieved: Option<Vec<String>>,
    pub difficulty_rating: Option<u8>,
    pub energy_level: Option<u8>,
    pub mood_rating: Option<u8>,
    pub notes: Option<String>,
}

/// Final data supplied when ending a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnd {
    pub ending_page: Option<u32>,
    pub goals_achieved: Option<Vec<String>>,
    pub difficulty_rating: Option<u8>,
    pub energy_level: Option<u8>,
    pub mood_rating: Option<u8>,
    pub notes: Option<String>,
}
