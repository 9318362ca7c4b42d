//! Wire protocol for per-session real-time streams.
//!
//! The transport (WebSocket, SSE, anything that moves JSON text) lives in
//! the surrounding application; this module only defines the messages and
//! translates inbound ones into supervisor calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ActivityKind, InterruptionSource, Session, SessionId};
use crate::timer::{SessionSupervisor, TimerState};

/// Messages pushed to observers: one per tick and one per discrete
/// transition, plus a terminal notice carrying the finalized record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    TimerUpdate {
        session_id: SessionId,
        timestamp: DateTime<Utc>,
        state: TimerState,
    },
    SessionCompleted {
        session_id: SessionId,
        timestamp: DateTime<Utc>,
        session: Session,
    },
}

impl ServerMessage {
    pub fn timer_update(state: TimerState, timestamp: DateTime<Utc>) -> Self {
        ServerMessage::TimerUpdate {
            session_id: state.session_id,
            timestamp,
            state,
        }
    }

    pub fn session_completed(session: Session, timestamp: DateTime<Utc>) -> Self {
        ServerMessage::SessionCompleted {
            session_id: session.id,
            timestamp,
            session,
        }
    }
}

/// Messages a connected client may send back on its stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Activity {
        #[serde(default = "default_activity_type")]
        activity_type: String,
    },
    Interruption {
        #[serde(default = "default_interruption_type")]
        interruption_type: String,
    },
}

fn default_activity_type() -> String {
    "interaction".to_string()
}

fn default_interruption_type() -> String {
    "unknown".to_string()
}

/// Feed one inbound client message into the engine. Returns whether the
/// session accepted it (false mirrors the register_* no-op semantics).
pub async fn dispatch_client_message(
    supervisor: &SessionSupervisor,
    session_id: SessionId,
    message: ClientMessage,
) -> bool {
    match message {
        ClientMessage::Activity { activity_type } => {
            supervisor
                .register_activity(session_id, ActivityKind::from_activity_label(&activity_type))
                .await
        }
        ClientMessage::Interruption { interruption_type } => {
            supervisor
                .register_interruption(
                    session_id,
                    InterruptionSource::from_label(&interruption_type),
                )
                .await
        }
    }
}
