pub mod state;
pub mod supervisor;
mod task;

pub use state::TimerState;
pub use supervisor::SessionSupervisor;
