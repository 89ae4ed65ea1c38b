use async_trait::async_trait;
use practice_core::model::{ProgressEntry, UserId};

use crate::repository::{ProgressRepository, StorageError};

use super::SqliteRepository;
use super::mapping::{conn, map_progress_row};

#[async_trait]
impl ProgressRepository for SqliteRepository {
    async fn append_entry(&self, user: &UserId, entry: &ProgressEntry) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO progress_entries
                (user_id, module, lesson_id, score, total, minutes, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(user.as_str())
        .bind(entry.module().as_str())
        .bind(entry.lesson_id())
        .bind(i64::from(entry.score()))
        .bind(i64::from(entry.total()))
        .bind(i64::from(entry.minutes()))
        .bind(entry.recorded_at())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn entries_for_user(&self, user: &UserId) -> Result<Vec<ProgressEntry>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT module, lesson_id, score, total, minutes, recorded_at
            FROM progress_entries
            WHERE user_id = ?1
            ORDER BY recorded_at ASC, id ASC
            ",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_progress_row).collect()
    }
}
