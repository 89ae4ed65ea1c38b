use chrono::{DateTime, Utc};
use practice_core::model::{CalendarDate, DailyMinuteRecord, ModuleName, ProgressEntry};
use sqlx::Row;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn map_daily_minutes_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<DailyMinuteRecord, StorageError> {
    let date: CalendarDate = row
        .try_get::<String, _>("date")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;
    let minutes: i64 = row.try_get("minutes").map_err(ser)?;
    Ok(DailyMinuteRecord::new(date, minutes))
}

pub(crate) fn map_progress_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ProgressEntry, StorageError> {
    let recorded_at: DateTime<Utc> = row.try_get("recorded_at").map_err(ser)?;
    let score = non_negative(row.try_get("score").map_err(ser)?)?;
    let lesson_id: Option<String> = row.try_get("lesson_id").map_err(ser)?;
    match lesson_id {
        Some(id) => ProgressEntry::lesson(&id, score, recorded_at).map_err(ser),
        None => {
            let module: String = row.try_get("module").map_err(ser)?;
            let total = non_negative(row.try_get("total").map_err(ser)?)?;
            let minutes: i64 = row.try_get("minutes").map_err(ser)?;
            ProgressEntry::new(ModuleName::new(&module), score, total, minutes, recorded_at)
                .map_err(ser)
        }
    }
}

fn non_negative(raw: i64) -> Result<u32, StorageError> {
    u32::try_from(raw).map_err(ser)
}
