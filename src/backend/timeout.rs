use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use super::{AttendanceGateway, GatewayError};
use crate::db::models::AttendanceRecord;

/// Bounds every async gateway call by `limit`. A call that overruns is
/// dropped on our side; the remote operation may still complete.
#[derive(Clone)]
pub struct TimeoutGateway {
    inner: Arc<dyn AttendanceGateway>,
    limit: Duration,
}

impl TimeoutGateway {
    pub fn new(inner: Arc<dyn AttendanceGateway>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, GatewayError>> + Send,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout(self.limit, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                operation,
                after: self.limit,
            }),
        }
    }
}

#[async_trait]
impl AttendanceGateway for TimeoutGateway {
    async fn attendance_exists(
        &self,
        subject_id: &str,
        date: NaiveDate,
    ) -> Result<bool, GatewayError> {
        self.bounded("attendance lookup", self.inner.attendance_exists(subject_id, date))
            .await
    }

    async fn upload_image(&self, path: &str, bytes: Vec<u8>) -> Result<(), GatewayError> {
        self.bounded("photo upload", self.inner.upload_image(path, bytes))
            .await
    }

    fn public_url(&self, path: &str) -> String {
        self.inner.public_url(path)
    }

    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), GatewayError> {
        self.bounded("attendance insert", self.inner.insert_attendance(record))
            .await
    }

    async fn delete_image(&self, path: &str) -> Result<(), GatewayError> {
        self.bounded("photo delete", self.inner.delete_image(path))
            .await
    }

    async fn list_attendance(
        &self,
        subject_id: &str,
        limit: usize,
    ) -> Result<Vec<AttendanceRecord>, GatewayError> {
        self.bounded("attendance list", self.inner.list_attendance(subject_id, limit))
            .await
    }

    async fn touch_last_seen(
        &self,
        subject_id: &str,
        at: NaiveDateTime,
    ) -> Result<(), GatewayError> {
        self.bounded("last-seen update", self.inner.touch_last_seen(subject_id, at))
            .await
    }
}
