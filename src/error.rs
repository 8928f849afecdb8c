//! Errors surfaced by the capture pipeline.
//!
//! Lower layers return their own typed errors; the orchestrator wraps them in
//! `CaptureError` and uses `kind()` to decide which state to fall back to.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    attendance::PolicyError,
    backend::GatewayError,
    camera::CameraError,
    capture::CaptureStatus,
    face::{FaceError, ValidationOutcome},
    location::LocationError,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Camera, detector or encoder trouble. The user retries by hand.
    Environment,
    /// The frame was not a usable single face. Recapture.
    Validation,
    /// Weekend, already marked, outside the work site.
    BusinessRule,
    /// Backend lookup, upload, insert or timeout. Submission may be retried
    /// with the same photo.
    Transport,
    Cancelled,
    /// The action is not valid in the current state.
    InvalidRequest,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Face(#[from] FaceError),
    #[error("{}", .0.message)]
    FaceRejected(ValidationOutcome),
    #[error("failed to encode the captured photo: {0}")]
    Encode(String),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("attendance already marked for {subject_id} on {date}")]
    AlreadyMarked {
        subject_id: String,
        date: NaiveDate,
        /// Set when the duplicate surfaced only at insert, after the photo
        /// was stored.
        orphaned_path: Option<String>,
    },
    #[error("a location fix is required to mark attendance here: {0}")]
    LocationRequired(LocationError),
    #[error("you are {distance_m:.0} m from the work site (allowed radius {radius_m:.0} m)")]
    OutsideGeofence { distance_m: f64, radius_m: f64 },
    #[error("could not check today's attendance: {0}")]
    GuardCheck(#[source] GatewayError),
    #[error(transparent)]
    Upload(GatewayError),
    #[error("{source} (uploaded photo left at {orphaned_path})")]
    Insert {
        #[source]
        source: GatewayError,
        orphaned_path: String,
    },
    #[error("failed to remove uploaded photo: {0}")]
    Cleanup(#[source] GatewayError),
    #[error("cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: CaptureStatus,
    },
    #[error("capture cancelled")]
    Cancelled,
    #[error("capture cancelled (uploaded photo left at {orphaned_path})")]
    CancelledAfterUpload { orphaned_path: String },
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::Camera(_) | CaptureError::Face(_) | CaptureError::Encode(_) => {
                ErrorKind::Environment
            }
            CaptureError::FaceRejected(_) => ErrorKind::Validation,
            CaptureError::Policy(_)
            | CaptureError::AlreadyMarked { .. }
            | CaptureError::LocationRequired(_)
            | CaptureError::OutsideGeofence { .. } => ErrorKind::BusinessRule,
            CaptureError::GuardCheck(_)
            | CaptureError::Upload(_)
            | CaptureError::Insert { .. }
            | CaptureError::Cleanup(_) => ErrorKind::Transport,
            CaptureError::InvalidState { .. } => ErrorKind::InvalidRequest,
            CaptureError::Cancelled | CaptureError::CancelledAfterUpload { .. } => {
                ErrorKind::Cancelled
            }
        }
    }

    /// Path of a photo that was stored although no record references it.
    pub fn orphaned_upload(&self) -> Option<&str> {
        match self {
            CaptureError::Insert { orphaned_path, .. }
            | CaptureError::CancelledAfterUpload { orphaned_path } => Some(orphaned_path),
            CaptureError::AlreadyMarked { orphaned_path, .. } => orphaned_path.as_deref(),
            _ => None,
        }
    }
}
