//! Data access gateway over the persistence/storage service.
//!
//! The capture pipeline only ever talks to `AttendanceGateway`. Two
//! implementations ship: `LocalBackend` (SQLite + a bucket directory) and
//! `RestBackend` (hosted tables and object storage over HTTP).
//! `TimeoutGateway` wraps either one with a per-call deadline.

pub mod local;
pub mod rest;
pub mod storage;
pub mod timeout;

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::{db::models::AttendanceRecord, db::Database, settings::BackendSettings};

pub use local::LocalBackend;
pub use rest::{RestBackend, RestConfig};
pub use storage::PhotoStore;
pub use timeout::TimeoutGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("attendance lookup failed: {0:#}")]
    Query(#[source] anyhow::Error),
    #[error("upload destination is missing: {0}")]
    DestinationMissing(String),
    #[error("photo upload failed: {0:#}")]
    Upload(#[source] anyhow::Error),
    #[error("attendance insert failed: {0:#}")]
    Insert(#[source] anyhow::Error),
    #[error("an attendance record already exists for {subject_id} on {date}")]
    Duplicate { subject_id: String, date: NaiveDate },
    #[error("storage request failed: {0:#}")]
    Storage(#[source] anyhow::Error),
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

#[async_trait]
pub trait AttendanceGateway: Send + Sync {
    /// Equality match on subject and date.
    async fn attendance_exists(&self, subject_id: &str, date: NaiveDate)
        -> Result<bool, GatewayError>;

    async fn upload_image(&self, path: &str, bytes: Vec<u8>) -> Result<(), GatewayError>;

    fn public_url(&self, path: &str) -> String;

    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), GatewayError>;

    /// Removes an uploaded object, e.g. a photo left behind by a failed insert.
    async fn delete_image(&self, path: &str) -> Result<(), GatewayError>;

    /// Most recent first.
    async fn list_attendance(
        &self,
        subject_id: &str,
        limit: usize,
    ) -> Result<Vec<AttendanceRecord>, GatewayError>;

    async fn touch_last_seen(&self, subject_id: &str, at: NaiveDateTime)
        -> Result<(), GatewayError>;
}

/// Builds the gateway described by `settings`. Local state lives under
/// `data_dir`.
pub fn connect(
    settings: &BackendSettings,
    data_dir: &Path,
    timeout: Option<Duration>,
) -> Result<Arc<dyn AttendanceGateway>> {
    let gateway: Arc<dyn AttendanceGateway> = match settings {
        BackendSettings::Local {
            photos_dir,
            public_base_url,
        } => {
            let db = Database::new(data_dir.join("attendance.sqlite3"))?;
            let bucket = photos_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("attendance-photos"));
            std::fs::create_dir_all(&bucket).with_context(|| {
                format!("failed to create photo bucket {}", bucket.display())
            })?;
            Arc::new(LocalBackend::new(
                db,
                PhotoStore::new(bucket, public_base_url.clone()),
            ))
        }
        BackendSettings::Remote {
            url,
            api_key,
            access_token,
            bucket,
            attendance_table,
            profiles_table,
        } => Arc::new(RestBackend::new(RestConfig {
            base_url: url.clone(),
            api_key: api_key.clone(),
            access_token: access_token.clone(),
            bucket: bucket.clone(),
            attendance_table: attendance_table.clone(),
            profiles_table: profiles_table.clone(),
        })?),
    };

    Ok(match timeout {
        Some(limit) => Arc::new(TimeoutGateway::new(gateway, limit)),
        None => gateway,
    })
}
