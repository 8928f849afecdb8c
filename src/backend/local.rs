use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use super::{AttendanceGateway, GatewayError, PhotoStore};
use crate::db::{models::AttendanceRecord, Database, InsertOutcome};

/// Gateway backed by the on-device SQLite store and a photo directory.
#[derive(Clone)]
pub struct LocalBackend {
    db: Database,
    photos: PhotoStore,
}

impl LocalBackend {
    pub fn new(db: Database, photos: PhotoStore) -> Self {
        Self { db, photos }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn photos(&self) -> &PhotoStore {
        &self.photos
    }
}

#[async_trait]
impl AttendanceGateway for LocalBackend {
    async fn attendance_exists(
        &self,
        subject_id: &str,
        date: NaiveDate,
    ) -> Result<bool, GatewayError> {
        self.db
            .attendance_exists(subject_id, date)
            .await
            .map_err(GatewayError::Query)
    }

    async fn upload_image(&self, path: &str, bytes: Vec<u8>) -> Result<(), GatewayError> {
        self.photos.upload(path, &bytes).await
    }

    fn public_url(&self, path: &str) -> String {
        self.photos.public_url(path)
    }

    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), GatewayError> {
        match self
            .db
            .insert_attendance(record)
            .await
            .map_err(GatewayError::Insert)?
        {
            InsertOutcome::Inserted => Ok(()),
            InsertOutcome::Duplicate => Err(GatewayError::Duplicate {
                subject_id: record.subject_id.clone(),
                date: record.date,
            }),
        }
    }

    async fn delete_image(&self, path: &str) -> Result<(), GatewayError> {
        self.photos.delete(path).await
    }

    async fn list_attendance(
        &self,
        subject_id: &str,
        limit: usize,
    ) -> Result<Vec<AttendanceRecord>, GatewayError> {
        self.db
            .list_attendance_for_subject(subject_id, limit)
            .await
            .map_err(GatewayError::Query)
    }

    async fn touch_last_seen(
        &self,
        subject_id: &str,
        at: NaiveDateTime,
    ) -> Result<(), GatewayError> {
        self.db
            .touch_last_seen(subject_id, at)
            .await
            .map_err(GatewayError::Storage)
    }
}
