#[cfg(feature = "desktop")]
pub mod commands;
pub mod guard;
pub mod policy;

pub use guard::SameDayGuard;
pub use policy::{AttendanceStamp, PolicyError, TimePolicy};
