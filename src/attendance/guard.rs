use std::sync::Arc;

use chrono::NaiveDate;
use log::warn;

use crate::backend::{AttendanceGateway, GatewayError};

/// Read-before-write check for the one-record-per-day rule.
///
/// The check and the later insert are separate calls with no lock between
/// them, so two clients submitting for the same subject at the same moment can
/// both pass. Backends with a unique index on (subject, date) turn the losing
/// insert into `GatewayError::Duplicate`.
#[derive(Clone)]
pub struct SameDayGuard {
    gateway: Arc<dyn AttendanceGateway>,
}

impl SameDayGuard {
    pub fn new(gateway: Arc<dyn AttendanceGateway>) -> Self {
        Self { gateway }
    }

    /// Strict variant used before writes: a failed lookup is an error.
    pub async fn has_marked_today(
        &self,
        subject_id: &str,
        date: NaiveDate,
    ) -> Result<bool, GatewayError> {
        self.gateway.attendance_exists(subject_id, date).await
    }

    /// For status displays that can simply ask again: lookup failures read as
    /// "not marked".
    pub async fn has_marked_today_lenient(&self, subject_id: &str, date: NaiveDate) -> bool {
        match self.has_marked_today(subject_id, date).await {
            Ok(marked) => marked,
            Err(err) => {
                warn!("same-day check for {subject_id} on {date} failed: {err}");
                false
            }
        }
    }
}
