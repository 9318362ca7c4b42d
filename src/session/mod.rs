pub mod ledger;
pub mod machine;
pub mod pomodoro;

pub use machine::EndOutcome;
