use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    camera::VideoStream,
    db::models::AttendanceRecord,
    error::{CaptureError, ErrorKind},
    face::ValidationOutcome,
    location::GeoPoint,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum CaptureStatus {
    #[default]
    Idle,
    CameraRequested,
    CameraActive,
    Capturing,
    Validating,
    ValidationFailed,
    Captured,
    Submitting,
    Success,
    SubmitFailed,
}

impl CaptureStatus {
    /// `ValidationFailed` behaves like `CameraActive`.
    pub fn accepts_capture(self) -> bool {
        matches!(self, CaptureStatus::CameraActive | CaptureStatus::ValidationFailed)
    }

    /// `SubmitFailed` behaves like `Captured`.
    pub fn accepts_submit(self) -> bool {
        matches!(self, CaptureStatus::Captured | CaptureStatus::SubmitFailed)
    }

    pub fn accepts_start(self) -> bool {
        matches!(self, CaptureStatus::Idle | CaptureStatus::Success)
    }
}

/// The validated photo waiting for submission.
#[derive(Clone)]
pub struct CapturedPhoto {
    pub jpeg: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

/// Mutable state of one orchestrator. Owns the camera stream.
pub struct CaptureSession {
    pub status: CaptureStatus,
    pub subject_id: Option<String>,
    pub stream: Option<Box<dyn VideoStream>>,
    pub position: Option<GeoPoint>,
    pub location_error: Option<String>,
    pub photo: Option<CapturedPhoto>,
    pub validation: Option<ValidationOutcome>,
    pub record: Option<AttendanceRecord>,
    pub orphaned_upload: Option<String>,
    pub message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Cancelled and replaced on every `cancel`; in-flight stages hold a
    /// clone and drop their result once it fires.
    pub cancel_token: CancellationToken,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self {
            status: CaptureStatus::Idle,
            subject_id: None,
            stream: None,
            position: None,
            location_error: None,
            photo: None,
            validation: None,
            record: None,
            orphaned_upload: None,
            message: None,
            error_kind: None,
            cancel_token: CancellationToken::new(),
        }
    }
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release_stream(&mut self) -> bool {
        match self.stream.take() {
            Some(mut stream) => {
                stream.stop();
                true
            }
            None => false,
        }
    }

    pub fn clear_error(&mut self) {
        self.message = None;
        self.error_kind = None;
    }

    pub fn record_error(&mut self, err: &CaptureError) {
        self.message = Some(err.to_string());
        self.error_kind = Some(err.kind());
        if let Some(path) = err.orphaned_upload() {
            self.orphaned_upload = Some(path.to_string());
        }
    }

    /// Back to `Idle`, dropping the stream and everything captured. An
    /// orphaned upload path survives so it can still be reconciled.
    pub fn reset(&mut self) {
        self.release_stream();
        self.status = CaptureStatus::Idle;
        self.subject_id = None;
        self.position = None;
        self.location_error = None;
        self.photo = None;
        self.validation = None;
        self.record = None;
        self.clear_error();
    }

    pub fn snapshot(&self, detector_ready: bool) -> CaptureSnapshot {
        CaptureSnapshot {
            status: self.status,
            subject_id: self.subject_id.clone(),
            camera_active: self
                .stream
                .as_ref()
                .map(|stream| stream.is_active())
                .unwrap_or(false),
            detector_ready,
            has_photo: self.photo.is_some(),
            position: self.position,
            location_error: self.location_error.clone(),
            validation: self.validation.clone(),
            record: self.record.clone(),
            orphaned_upload: self.orphaned_upload.clone(),
            message: self.message.clone(),
            error_kind: self.error_kind,
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self.release_stream();
    }
}

/// What the UI sees after every transition.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSnapshot {
    pub status: CaptureStatus,
    pub subject_id: Option<String>,
    pub camera_active: bool,
    pub detector_ready: bool,
    pub has_photo: bool,
    pub position: Option<GeoPoint>,
    pub location_error: Option<String>,
    pub validation: Option<ValidationOutcome>,
    pub record: Option<AttendanceRecord>,
    pub orphaned_upload: Option<String>,
    /// Last user-facing message: a validation verdict or an error.
    pub message: Option<String>,
    pub error_kind: Option<ErrorKind>,
}
