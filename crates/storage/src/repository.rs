use async_trait::async_trait;
use practice_core::model::{CalendarDate, DailyMinuteRecord, ProgressEntry, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// String key-value persistence with read/write/delete semantics.
///
/// Stands in for browser local storage: a small, local, durable map.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `None` if the key was never written or was deleted.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn get_value(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write or overwrite a value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the value cannot be stored.
    async fn set_value(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    async fn delete_value(&self, key: &str) -> Result<(), StorageError>;

    /// Every key starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Durable per-user, per-date minute totals.
///
/// Writes are additive so uncoordinated writers (several tabs or devices for
/// the same user) commute. Every read is clamped to one day.
#[async_trait]
pub trait DailyMinutesRepository: Send + Sync {
    /// Add `minutes` to the record for `(user, date)`, creating it if needed,
    /// and return the new clamped total.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the increment cannot be persisted.
    async fn increment_minutes(
        &self,
        user: &UserId,
        date: CalendarDate,
        minutes: u32,
    ) -> Result<DailyMinuteRecord, StorageError>;

    /// Fetch one day's total; `None` if nothing was ever flushed for it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn minutes_for_date(
        &self,
        user: &UserId,
        date: CalendarDate,
    ) -> Result<Option<DailyMinuteRecord>, StorageError>;

    /// All records with `start <= date <= end`, ordered by date.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn minutes_for_range(
        &self,
        user: &UserId,
        start: CalendarDate,
        end: CalendarDate,
    ) -> Result<Vec<DailyMinuteRecord>, StorageError>;
}

/// Append-only log of a user's quiz, practice and lesson results.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Store one more entry for `user`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the entry cannot be persisted.
    async fn append_entry(&self, user: &UserId, entry: &ProgressEntry) -> Result<(), StorageError>;

    /// All entries of `user`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn entries_for_user(&self, user: &UserId) -> Result<Vec<ProgressEntry>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    values: Arc<Mutex<HashMap<String, String>>>,
    minutes: Arc<Mutex<HashMap<(UserId, CalendarDate), i64>>>,
    progress: Arc<Mutex<Vec<(UserId, ProgressEntry)>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: Arc::new(Mutex::new(HashMap::new())),
            minutes: Arc::new(Mutex::new(HashMap::new())),
            progress: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryRepository {
    async fn get_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self
            .values
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self
            .values
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self
            .values
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let guard = self
            .values
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut keys: Vec<String> = guard
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl DailyMinutesRepository for InMemoryRepository {
    async fn increment_minutes(
        &self,
        user: &UserId,
        date: CalendarDate,
        minutes: u32,
    ) -> Result<DailyMinuteRecord, StorageError> {
        let mut guard = self
            .minutes
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let total = guard.entry((user.clone(), date)).or_insert(0);
        *total = total.saturating_add(i64::from(minutes));
        Ok(DailyMinuteRecord::new(date, *total))
    }

    async fn minutes_for_date(
        &self,
        user: &UserId,
        date: CalendarDate,
    ) -> Result<Option<DailyMinuteRecord>, StorageError> {
        let guard = self
            .minutes
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .get(&(user.clone(), date))
            .map(|raw| DailyMinuteRecord::new(date, *raw)))
    }

    async fn minutes_for_range(
        &self,
        user: &UserId,
        start: CalendarDate,
        end: CalendarDate,
    ) -> Result<Vec<DailyMinuteRecord>, StorageError> {
        let guard = self
            .minutes
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut found: Vec<DailyMinuteRecord> = guard
            .iter()
            .filter(|((owner, date), _)| owner == user && start <= *date && *date <= end)
            .map(|((_, date), raw)| DailyMinuteRecord::new(*date, *raw))
            .collect();
        found.sort_by_key(DailyMinuteRecord::date);
        Ok(found)
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn append_entry(&self, user: &UserId, entry: &ProgressEntry) -> Result<(), StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.push((user.clone(), entry.clone()));
        Ok(())
    }

    async fn entries_for_user(&self, user: &UserId) -> Result<Vec<ProgressEntry>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut found: Vec<ProgressEntry> = guard
            .iter()
            .filter(|(owner, _)| owner == user)
            .map(|(_, entry)| entry.clone())
            .collect();
        found.sort_by_key(ProgressEntry::recorded_at);
        Ok(found)
    }
}

/// Aggregates the local key-value store, the daily minutes store and the
/// progress log behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub kv: Arc<dyn KeyValueStore>,
    pub daily_minutes: Arc<dyn DailyMinutesRepository>,
    pub progress: Arc<dyn ProgressRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let kv: Arc<dyn KeyValueStore> = Arc::new(repo.clone());
        let daily_minutes: Arc<dyn DailyMinutesRepository> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo);
        Self {
            kv,
            daily_minutes,
            progress,
        }
    }
}
