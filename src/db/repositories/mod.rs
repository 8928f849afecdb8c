pub mod attendance;
pub mod subjects;

pub use attendance::InsertOutcome;
