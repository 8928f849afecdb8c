//! Attendance data models.
//!
//! One `AttendanceRecord` per subject per calendar day. The date and check-in
//! time are local wall-clock values taken from the marking device.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::location::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Late => "Late",
            AttendanceStatus::Absent => "Absent",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub subject_id: String,
    pub date: NaiveDate,
    #[serde(with = "crate::utils::hhmm")]
    pub check_in_time: NaiveTime,
    pub status: AttendanceStatus,
    pub photo_url: String,
    pub location: Option<GeoPoint>,
}
