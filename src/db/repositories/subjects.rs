use anyhow::Result;
use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime},
};

impl Database {
    pub async fn touch_last_seen(&self, subject_id: &str, at: NaiveDateTime) -> Result<()> {
        let subject_id = subject_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO subjects (id, last_seen_at) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET last_seen_at = excluded.last_seen_at",
                params![subject_id, format_datetime(at)],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn last_seen(&self, subject_id: &str) -> Result<Option<NaiveDateTime>> {
        let subject_id = subject_id.to_string();
        self.execute(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT last_seen_at FROM subjects WHERE id = ?1",
                    params![subject_id],
                    |row| row.get(0),
                )
                .optional()?;

            raw.map(|value| parse_datetime(&value, "last_seen_at"))
                .transpose()
        })
        .await
    }
}
