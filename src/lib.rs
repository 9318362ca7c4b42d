//! focustrack: live study-session timer and focus-scoring engine.
//!
//! One background task per live session keeps its clock, attributes elapsed
//! time to active/idle/break buckets, recomputes focus and productivity
//! scores on every event, sequences nested Pomodoro cycles, and fans state
//! snapshots out to real-time observers. All mutation for a session is
//! serialized through that session's task, so there is exactly one writer
//! per record.
//!
//! The surrounding application supplies a [`store::SessionStore`] (SQLite
//! and in-memory implementations ship here), drives the
//! [`SessionSupervisor`] control surface from its HTTP layer, and moves
//! [`protocol`] messages over whatever transport it likes.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod models;
pub mod protocol;
pub mod scoring;
pub mod session;
pub mod store;
pub mod timer;

pub use broadcast::{BroadcastHub, ObserverHandle};
pub use config::{ScoreConfig, SessionPolicy, TimerConfig};
pub use error::{ErrorKind, Result, SessionError};
pub use models::{
    ActivityEvent, ActivityKind, BreakKind, CycleCompletion, CycleId, CycleKind,
    InterruptionSource, PomodoroCycle, Session, SessionBreak, SessionEnd, SessionId,
    SessionKind, SessionPatch, SessionSpec, SessionState,
};
pub use protocol::{ClientMessage, ServerMessage};
pub use session::EndOutcome;
pub use store::{MemoryStore, SessionStore, SqliteStore, StoreError};
pub use timer::{SessionSupervisor, TimerState};
