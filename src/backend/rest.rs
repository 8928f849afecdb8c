use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use log::debug;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{AttendanceGateway, GatewayError};
use crate::{
    db::models::{AttendanceRecord, AttendanceStatus},
    location::GeoPoint,
};

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub api_key: String,
    /// Signed-in user's token; the API key is sent as bearer when absent.
    pub access_token: Option<String>,
    pub bucket: String,
    pub attendance_table: String,
    pub profiles_table: String,
}

/// Gateway for a hosted backend exposing PostgREST-style tables under
/// `/rest/v1` and object storage under `/storage/v1`.
#[derive(Clone)]
pub struct RestBackend {
    client: Client,
    config: RestConfig,
}

/// Row shape of the hosted attendance table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct AttendanceRow {
    employee_id: String,
    date: NaiveDate,
    #[serde(with = "crate::utils::hhmm")]
    check_in_time: NaiveTime,
    status: AttendanceStatus,
    photo_url: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl From<&AttendanceRecord> for AttendanceRow {
    fn from(record: &AttendanceRecord) -> Self {
        Self {
            employee_id: record.subject_id.clone(),
            date: record.date,
            check_in_time: record.check_in_time,
            status: record.status,
            photo_url: record.photo_url.clone(),
            latitude: record.location.map(|point| point.latitude),
            longitude: record.location.map(|point| point.longitude),
        }
    }
}

impl From<AttendanceRow> for AttendanceRecord {
    fn from(row: AttendanceRow) -> Self {
        let location = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint::new(latitude, longitude)),
            _ => None,
        };
        Self {
            subject_id: row.employee_id,
            date: row.date,
            check_in_time: row.check_in_time,
            status: row.status,
            photo_url: row.photo_url,
            location,
        }
    }
}

async fn ensure_success(response: Response, what: &str) -> anyhow::Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(anyhow!("{what} returned {status}: {body}"))
}

impl RestBackend {
    pub fn new(config: RestConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("attendance-kiosk/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client, config })
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base(), table)
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base(),
            self.config.bucket,
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let token = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.api_key);
        builder
            .header("apikey", &self.config.api_key)
            .bearer_auth(token)
    }
}

#[async_trait]
impl AttendanceGateway for RestBackend {
    async fn attendance_exists(
        &self,
        subject_id: &str,
        date: NaiveDate,
    ) -> Result<bool, GatewayError> {
        let query = [
            ("select", "id".to_string()),
            ("employee_id", format!("eq.{subject_id}")),
            ("date", format!("eq.{}", date.format("%Y-%m-%d"))),
            ("limit", "1".to_string()),
        ];

        let lookup = async {
            let response = self
                .authorized(self.client.get(self.table_url(&self.config.attendance_table)))
                .query(&query)
                .send()
                .await
                .context("attendance lookup request failed")?;
            let rows: Vec<serde_json::Value> = ensure_success(response, "attendance lookup")
                .await?
                .json()
                .await
                .context("attendance lookup returned malformed JSON")?;
            Ok::<_, anyhow::Error>(!rows.is_empty())
        };

        lookup.await.map_err(GatewayError::Query)
    }

    async fn upload_image(&self, path: &str, bytes: Vec<u8>) -> Result<(), GatewayError> {
        debug!("Uploading {} bytes to {}", bytes.len(), self.object_url(path));
        let response = self
            .authorized(self.client.post(self.object_url(path)))
            .header("content-type", "image/jpeg")
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .context("photo upload request failed")
            .map_err(GatewayError::Upload)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND || body.contains("Bucket not found") {
            return Err(GatewayError::DestinationMissing(self.config.bucket.clone()));
        }
        Err(GatewayError::Upload(anyhow!(
            "storage returned {status}: {body}"
        )))
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base(),
            self.config.bucket,
            path.trim_start_matches('/')
        )
    }

    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), GatewayError> {
        let row = AttendanceRow::from(record);
        let response = self
            .authorized(self.client.post(self.table_url(&self.config.attendance_table)))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await
            .context("attendance insert request failed")
            .map_err(GatewayError::Insert)?;

        if response.status() == StatusCode::CONFLICT {
            return Err(GatewayError::Duplicate {
                subject_id: record.subject_id.clone(),
                date: record.date,
            });
        }

        ensure_success(response, "attendance insert")
            .await
            .map(|_| ())
            .map_err(GatewayError::Insert)
    }

    async fn delete_image(&self, path: &str) -> Result<(), GatewayError> {
        let response = self
            .authorized(self.client.delete(self.object_url(path)))
            .send()
            .await
            .context("photo delete request failed")
            .map_err(GatewayError::Storage)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response, "photo delete")
            .await
            .map(|_| ())
            .map_err(GatewayError::Storage)
    }

    async fn list_attendance(
        &self,
        subject_id: &str,
        limit: usize,
    ) -> Result<Vec<AttendanceRecord>, GatewayError> {
        let query = [
            ("select", "*".to_string()),
            ("employee_id", format!("eq.{subject_id}")),
            ("order", "date.desc".to_string()),
            ("limit", limit.to_string()),
        ];

        let listing = async {
            let response = self
                .authorized(self.client.get(self.table_url(&self.config.attendance_table)))
                .query(&query)
                .send()
                .await
                .context("attendance list request failed")?;
            let rows: Vec<AttendanceRow> = ensure_success(response, "attendance list")
                .await?
                .json()
                .await
                .context("attendance list returned malformed JSON")?;
            Ok::<_, anyhow::Error>(rows.into_iter().map(AttendanceRecord::from).collect())
        };

        listing.await.map_err(GatewayError::Query)
    }

    async fn touch_last_seen(
        &self,
        subject_id: &str,
        at: NaiveDateTime,
    ) -> Result<(), GatewayError> {
        let response = self
            .authorized(self.client.patch(self.table_url(&self.config.profiles_table)))
            .query(&[("id", format!("eq.{subject_id}"))])
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "last_seen": at.format("%Y-%m-%dT%H:%M:%S").to_string() }))
            .send()
            .await
            .context("last-seen update request failed")
            .map_err(GatewayError::Storage)?;

        ensure_success(response, "last-seen update")
            .await
            .map(|_| ())
            .map_err(GatewayError::Storage)
    }
}
