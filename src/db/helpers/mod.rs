use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::db::models::AttendanceStatus;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn format_time(time: NaiveTime) -> String {
    time.format(crate::utils::hhmm::FORMAT).to_string()
}

pub fn format_datetime(value: NaiveDateTime) -> String {
    value.format(DATETIME_FORMAT).to_string()
}

pub fn parse_date(value: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).with_context(|| format!("failed to parse {field}"))
}

pub fn parse_time(value: &str, field: &str) -> Result<NaiveTime> {
    crate::utils::hhmm::parse(value).with_context(|| format!("failed to parse {field}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_status(value: &str) -> Result<AttendanceStatus> {
    match value {
        "Present" => Ok(AttendanceStatus::Present),
        "Late" => Ok(AttendanceStatus::Late),
        "Absent" => Ok(AttendanceStatus::Absent),
        other => Err(anyhow!("unknown attendance status {other}")),
    }
}

pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
