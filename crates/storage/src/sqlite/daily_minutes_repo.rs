use async_trait::async_trait;
use chrono::Utc;
use practice_core::model::{CalendarDate, DailyMinuteRecord, UserId};
use sqlx::Row;

use crate::repository::{DailyMinutesRepository, StorageError};

use super::SqliteRepository;
use super::mapping::{conn, map_daily_minutes_row, ser};

#[async_trait]
impl DailyMinutesRepository for SqliteRepository {
    async fn increment_minutes(
        &self,
        user: &UserId,
        date: CalendarDate,
        minutes: u32,
    ) -> Result<DailyMinuteRecord, StorageError> {
        // Single-statement upsert so concurrent writers add rather than overwrite.
        let row = sqlx::query(
            r"
            INSERT INTO daily_minutes (user_id, date, minutes, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, date) DO UPDATE SET
                minutes = daily_minutes.minutes + excluded.minutes,
                updated_at = excluded.updated_at
            RETURNING minutes
            ",
        )
        .bind(user.as_str())
        .bind(date.to_string())
        .bind(i64::from(minutes))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(conn)?;

        let total: i64 = row.try_get("minutes").map_err(ser)?;
        Ok(DailyMinuteRecord::new(date, total))
    }

    async fn minutes_for_date(
        &self,
        user: &UserId,
        date: CalendarDate,
    ) -> Result<Option<DailyMinuteRecord>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT date, minutes
            FROM daily_minutes
            WHERE user_id = ?1 AND date = ?2
            ",
        )
        .bind(user.as_str())
        .bind(date.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_daily_minutes_row).transpose()
    }

    async fn minutes_for_range(
        &self,
        user: &UserId,
        start: CalendarDate,
        end: CalendarDate,
    ) -> Result<Vec<DailyMinuteRecord>, StorageError> {
        // ISO dates compare correctly as text.
        let rows = sqlx::query(
            r"
            SELECT date, minutes
            FROM daily_minutes
            WHERE user_id = ?1 AND date BETWEEN ?2 AND ?3
            ORDER BY date ASC
            ",
        )
        .bind(user.as_str())
        .bind(start.to_string())
        .bind(end.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_daily_minutes_row).collect()
    }
}
