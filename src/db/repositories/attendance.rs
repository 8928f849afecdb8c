use anyhow::Result;
use chrono::{Local, NaiveDate};
use rusqlite::{params, OptionalExtension, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{
            format_date, format_datetime, format_time, is_unique_violation, parse_date,
            parse_status, parse_time,
        },
        models::AttendanceRecord,
    },
    location::GeoPoint,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

const RECORD_COLUMNS: &str =
    "subject_id, date, check_in_time, status, photo_url, latitude, longitude, accuracy_m";

fn row_to_record(row: &Row) -> Result<AttendanceRecord> {
    let date: String = row.get("date")?;
    let check_in_time: String = row.get("check_in_time")?;
    let status: String = row.get("status")?;
    let latitude: Option<f64> = row.get("latitude")?;
    let longitude: Option<f64> = row.get("longitude")?;
    let accuracy_m: Option<f64> = row.get("accuracy_m")?;

    let location = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(GeoPoint {
            latitude,
            longitude,
            accuracy_m,
        }),
        _ => None,
    };

    Ok(AttendanceRecord {
        subject_id: row.get("subject_id")?,
        date: parse_date(&date, "date")?,
        check_in_time: parse_time(&check_in_time, "check_in_time")?,
        status: parse_status(&status)?,
        photo_url: row.get("photo_url")?,
        location,
    })
}

impl Database {
    pub async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<InsertOutcome> {
        let record = record.clone();
        self.execute(move |conn| {
            let location = record.location;
            let result = conn.execute(
                "INSERT INTO attendance_records
                    (subject_id, date, check_in_time, status, photo_url, latitude, longitude, accuracy_m, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.subject_id,
                    format_date(record.date),
                    format_time(record.check_in_time),
                    record.status.as_str(),
                    record.photo_url,
                    location.map(|point| point.latitude),
                    location.map(|point| point.longitude),
                    location.and_then(|point| point.accuracy_m),
                    format_datetime(Local::now().naive_local()),
                ],
            );

            match result {
                Ok(_) => Ok(InsertOutcome::Inserted),
                Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Duplicate),
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    pub async fn attendance_exists(&self, subject_id: &str, date: NaiveDate) -> Result<bool> {
        let subject_id = subject_id.to_string();
        self.execute(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM attendance_records WHERE subject_id = ?1 AND date = ?2
                 )",
                params![subject_id, format_date(date)],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    pub async fn get_attendance(
        &self,
        subject_id: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>> {
        let subject_id = subject_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM attendance_records
                 WHERE subject_id = ?1 AND date = ?2
                 LIMIT 1"
            ))?;

            let record = stmt
                .query_row(params![subject_id, format_date(date)], |row| {
                    Ok(row_to_record(row))
                })
                .optional()?
                .transpose()?;

            Ok(record)
        })
        .await
    }

    pub async fn list_attendance_for_subject(
        &self,
        subject_id: &str,
        limit: usize,
    ) -> Result<Vec<AttendanceRecord>> {
        let subject_id = subject_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM attendance_records
                 WHERE subject_id = ?1
                 ORDER BY date DESC
                 LIMIT ?2"
            ))?;

            let mut rows = stmt.query(params![subject_id, limit])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }

            Ok(records)
        })
        .await
    }
}
