use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::AttendanceStatus;

pub const DEFAULT_GRACE_MINUTES: u32 = 10;

pub fn default_threshold() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN)
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("attendance cannot be marked on weekends ({0})")]
    WeekendNotAllowed(Weekday),
}

/// Result of evaluating a check-in instant. Nothing here is persisted; the
/// caller decides what to do with it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStamp {
    pub date: NaiveDate,
    #[serde(with = "crate::utils::hhmm")]
    pub check_in_time: NaiveTime,
    pub status: AttendanceStatus,
}

/// Fixed on-time threshold plus a late grace window, in whole minutes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimePolicy {
    #[serde(with = "crate::utils::hhmm")]
    pub threshold: NaiveTime,
    pub grace_minutes: u32,
}

impl Default for TimePolicy {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            grace_minutes: DEFAULT_GRACE_MINUTES,
        }
    }
}

impl TimePolicy {
    pub fn new(threshold: NaiveTime, grace_minutes: u32) -> Self {
        Self {
            threshold,
            grace_minutes,
        }
    }

    pub fn evaluate(&self, now: NaiveDateTime) -> Result<AttendanceStamp, PolicyError> {
        let weekday = now.weekday();
        if matches!(weekday, Weekday::Sat | Weekday::Sun) {
            return Err(PolicyError::WeekendNotAllowed(weekday));
        }

        let check_in_minutes = now.hour() * 60 + now.minute();
        let check_in_time =
            NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or_else(|| now.time());

        Ok(AttendanceStamp {
            date: now.date(),
            check_in_time,
            status: self.status_for(check_in_minutes),
        })
    }

    pub fn status_for(&self, check_in_minutes: u32) -> AttendanceStatus {
        let threshold = self.threshold.hour() * 60 + self.threshold.minute();

        if check_in_minutes <= threshold {
            AttendanceStatus::Present
        } else if check_in_minutes <= threshold.saturating_add(self.grace_minutes) {
            AttendanceStatus::Late
        } else {
            AttendanceStatus::Absent
        }
    }
}
