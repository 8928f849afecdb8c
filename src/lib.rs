pub mod attendance;
pub mod backend;
pub mod camera;
pub mod capture;
pub mod clock;
pub mod db;
pub mod error;
pub mod face;
pub mod location;
pub mod settings;
pub mod utils;

#[cfg(feature = "desktop")]
mod app;

#[cfg(feature = "desktop")]
pub use app::run;

pub use capture::{CaptureOrchestrator, CaptureServices, CaptureSnapshot, CaptureStatus};
pub use error::{CaptureError, ErrorKind};
