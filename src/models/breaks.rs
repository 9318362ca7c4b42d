use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SessionId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BreakKind {
    Planned,
    Pomodoro,
    Interruption,
    Fatigue,
}

impl BreakKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakKind::Planned => "planned",
            BreakKind::Pomodoro => "pomodoro",
            BreakKind::Interruption => "interruption",
            BreakKind::Fatigue => "fatigue",
        }
    }
}

/// One pause span inside a session. At most one break per session is open
/// (unterminated) at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBreak {
    pub id: Uuid,
    pub session_id: SessionId,
    pub kind: BreakKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionBreak {
    pub fn open(session_id: SessionId, kind: BreakKind, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            kind,
            started_at: now,
            ended_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Duration in milliseconds; `None` while the break is still open.
    pub fn duration_ms(&self) -> Option<u64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}
