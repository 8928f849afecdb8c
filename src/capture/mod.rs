#[cfg(feature = "desktop")]
pub mod commands;
pub mod controller;
pub mod state;

pub use controller::{photo_path, CaptureOrchestrator, CaptureServices};
pub use state::{CaptureSession, CaptureSnapshot, CaptureStatus, CapturedPhoto};

/// Receives a snapshot after every state change. Called with the session
/// locked, so implementations must not call back into the orchestrator.
pub trait CaptureListener: Send + Sync {
    fn on_state_changed(&self, snapshot: &CaptureSnapshot);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl CaptureListener for NoopListener {
    fn on_state_changed(&self, _snapshot: &CaptureSnapshot) {}
}
