mod breaks;
mod event;
mod pomodoro;
mod session;

pub use breaks::{BreakKind, SessionBreak};
pub use event::{ActivityEvent, ActivityKind, InterruptionSource};
pub use pomodoro::{CycleCompletion, CycleKind, PomodoroCycle};
pub use session::{
    Session, SessionEnd, SessionKind, SessionPatch, SessionSpec, SessionState,
};

/// Identity of a study session.
pub type SessionId = uuid::Uuid;

/// Identity of a Pomodoro cycle.
pub type CycleId = uuid::Uuid;
