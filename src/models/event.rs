use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SessionId;

/// What interrupted the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionSource {
    PhoneCall,
    Notification,
    Noise,
    Person,
    Unknown,
}

impl InterruptionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterruptionSource::PhoneCall => "phone_call",
            InterruptionSource::Notification => "notification",
            InterruptionSource::Noise => "noise",
            InterruptionSource::Person => "person",
            InterruptionSource::Unknown => "unknown",
        }
    }

    /// Lenient parse for wire labels; anything unrecognized is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "phone_call" => InterruptionSource::PhoneCall,
            "notification" => InterruptionSource::Notification,
            "noise" => InterruptionSource::Noise,
            "person" => InterruptionSource::Person,
            _ => InterruptionSource::Unknown,
        }
    }
}

/// Tagged activity payload; each event kind carries its own fields rather
/// than an open map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityKind {
    Interaction,
    PageChange { page: u32 },
    Note,
    Highlight,
    Interruption { source: InterruptionSource },
    Pause,
    Resume,
}

impl ActivityKind {
    pub fn is_interruption(&self) -> bool {
        matches!(self, ActivityKind::Interruption { .. })
    }

    /// Lenient parse for wire labels; anything unrecognized (including
    /// page changes, which need a page number) counts as plain interaction.
    pub fn from_activity_label(label: &str) -> Self {
        match label {
            "note" => ActivityKind::Note,
            "highlight" => ActivityKind::Highlight,
            _ => ActivityKind::Interaction,
        }
    }
}

/// One timestamped entry in a session's activity ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
}
