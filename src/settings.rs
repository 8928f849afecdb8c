use anyhow::{Context, Result};
use chrono::NaiveTime;
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::{
    attendance::{
        policy::{default_threshold, DEFAULT_GRACE_MINUTES},
        TimePolicy,
    },
    camera::{CameraConstraints, FacingMode},
    face::{DetectorConfig, RunningMode, DEFAULT_MIN_FACE_SIZE_PX},
    location::{Geofence, DEFAULT_MAX_FIX_AGE, DEFAULT_REQUEST_TIMEOUT},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicySettings {
    #[serde(with = "crate::utils::hhmm")]
    pub threshold: NaiveTime,
    pub grace_minutes: u32,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            grace_minutes: DEFAULT_GRACE_MINUTES,
        }
    }
}

impl PolicySettings {
    pub fn to_policy(&self) -> TimePolicy {
        TimePolicy::new(self.threshold, self.grace_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FaceSettings {
    pub model_path: PathBuf,
    pub min_face_size_px: u32,
    pub score_threshold: f64,
    pub min_detector_window_px: u32,
}

impl Default for FaceSettings {
    fn default() -> Self {
        let detector = DetectorConfig::default();
        Self {
            model_path: detector.model_path,
            min_face_size_px: DEFAULT_MIN_FACE_SIZE_PX,
            score_threshold: detector.score_threshold,
            min_detector_window_px: detector.min_window_px,
        }
    }
}

impl FaceSettings {
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            model_path: self.model_path.clone(),
            running_mode: RunningMode::Image,
            min_window_px: self.min_detector_window_px,
            score_threshold: self.score_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraSettings {
    pub facing_mode: FacingMode,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        let constraints = CameraConstraints::default();
        Self {
            facing_mode: constraints.facing_mode,
            width: constraints.width,
            height: constraints.height,
        }
    }
}

impl CameraSettings {
    pub fn constraints(&self) -> CameraConstraints {
        CameraConstraints {
            facing_mode: self.facing_mode,
            width: self.width,
            height: self.height,
        }
    }
}

/// How old a reported position may be before a new one is requested, and
/// how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationSettings {
    pub max_fix_age_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            max_fix_age_secs: DEFAULT_MAX_FIX_AGE.as_secs(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl LocationSettings {
    pub fn max_fix_age(&self) -> Duration {
        Duration::from_secs(self.max_fix_age_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

fn default_bucket() -> String {
    "attendance-photos".into()
}

fn default_attendance_table() -> String {
    "attendance".into()
}

fn default_profiles_table() -> String {
    "profiles".into()
}

/// Where records and photos go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BackendSettings {
    /// SQLite database and a photo directory under the app data dir.
    #[serde(rename_all = "camelCase")]
    Local {
        #[serde(default)]
        photos_dir: Option<PathBuf>,
        #[serde(default)]
        public_base_url: Option<String>,
    },
    /// Hosted tables and object storage.
    #[serde(rename_all = "camelCase")]
    Remote {
        url: String,
        api_key: String,
        #[serde(default)]
        access_token: Option<String>,
        #[serde(default = "default_bucket")]
        bucket: String,
        #[serde(default = "default_attendance_table")]
        attendance_table: String,
        #[serde(default = "default_profiles_table")]
        profiles_table: String,
    },
}

impl Default for BackendSettings {
    fn default() -> Self {
        BackendSettings::Local {
            photos_dir: None,
            public_base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AttendanceSettings {
    pub policy: PolicySettings,
    pub face: FaceSettings,
    pub camera: CameraSettings,
    pub backend: BackendSettings,
    pub location: LocationSettings,
    pub geofence: Option<Geofence>,
    pub gateway_timeout_secs: Option<u64>,
}

impl AttendanceSettings {
    pub fn gateway_timeout(&self) -> Option<Duration> {
        self.gateway_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// JSON settings file kept in memory behind a lock and written back on every
/// update.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AttendanceSettings>,
}

impl SettingsStore {
    /// Falls back to defaults when the file is missing or unparsable.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring unreadable settings at {}: {err}",
                    path.display()
                );
                AttendanceSettings::default()
            })
        } else {
            AttendanceSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> AttendanceSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: AttendanceSettings) -> Result<()> {
        let mut guard = self.write();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &AttendanceSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, AttendanceSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, AttendanceSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
