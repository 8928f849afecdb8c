//! Camera capability used by the capture orchestrator.
//!
//! The orchestrator opens a stream, grabs still frames out of it on demand
//! and stops it. The device behind it may be the webview's media stack
//! (`BridgeCamera`) or anything else implementing `CameraDevice`.

pub mod bridge;
#[cfg(feature = "desktop")]
pub mod commands;

use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bridge::{BridgeCamera, BridgeSignal};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum FacingMode {
    #[default]
    User,
    Environment,
}

/// Hints passed to the device when requesting a stream. Devices may deliver
/// a different resolution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CameraConstraints {
    pub facing_mode: FacingMode,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            facing_mode: FacingMode::User,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("no camera device found")]
    NoDevice,
    #[error("camera error: {0}")]
    Other(String),
}

impl CameraError {
    /// Classifies a `DOMException` name raised by `getUserMedia`.
    pub fn from_dom_error(name: &str, message: &str) -> Self {
        match name {
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => {
                CameraError::PermissionDenied
            }
            "NotFoundError" | "DevicesNotFoundError" | "OverconstrainedError" => {
                CameraError::NoDevice
            }
            _ if message.is_empty() => CameraError::Other(name.to_string()),
            _ => CameraError::Other(format!("{name}: {message}")),
        }
    }
}

#[async_trait]
pub trait CameraDevice: Send + Sync {
    async fn open(
        &self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn VideoStream>, CameraError>;
}

/// A live stream owned by whoever opened it.
pub trait VideoStream: Send {
    /// Copies the current frame into a fresh raster buffer.
    fn grab_frame(&mut self) -> Result<RgbImage, CameraError>;

    /// Releases the device. Safe to call more than once.
    fn stop(&mut self);

    fn is_active(&self) -> bool;
}
