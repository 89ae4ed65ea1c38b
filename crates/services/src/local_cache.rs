//! Typed view over the local key-value store.
//!
//! Layout: `minutes_<date>` holds the last known total of a day,
//! `unflushed_seconds_<date>` the live seconds of the running tracker,
//! `failed_minutes` the Failed-Flush Buffer, `unsynced_minutes_<date>` the
//! minutes practiced without a usable credential, `practice_count_<module>`
//! the device-local practice counters and `token` the bearer credential.
//!
//! `account` names the credential that owns the day totals, the practice
//! counters and the Failed-Flush Buffer. Unsynced minutes belong to nobody
//! until the next sign-in delivers them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use practice_core::model::{CalendarDate, WeekStart, clamp_day_minutes};
use storage::repository::{KeyValueStore, StorageError};
use tracing::{debug, warn};

use crate::credentials::Credential;

pub const FAILED_MINUTES_KEY: &str = "failed_minutes";
pub const TOKEN_KEY: &str = "token";
pub const ACCOUNT_KEY: &str = "account";

const MINUTES_PREFIX: &str = "minutes_";
const UNSYNCED_PREFIX: &str = "unsynced_minutes_";
const PRACTICE_COUNT_PREFIX: &str = "practice_count_";

#[must_use]
pub fn minutes_key(date: CalendarDate) -> String {
    format!("{MINUTES_PREFIX}{date}")
}

#[must_use]
pub fn unflushed_seconds_key(date: CalendarDate) -> String {
    format!("unflushed_seconds_{date}")
}

#[must_use]
pub fn unsynced_minutes_key(date: CalendarDate) -> String {
    format!("{UNSYNCED_PREFIX}{date}")
}

#[must_use]
pub fn practice_count_key(module: &str) -> String {
    format!("{PRACTICE_COUNT_PREFIX}{module}")
}

#[derive(Clone)]
pub struct LocalCache {
    kv: Arc<dyn KeyValueStore>,
}

impl LocalCache {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Cached durable total for `date`, clamped to a day.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    pub async fn cached_minutes(&self, date: CalendarDate) -> Result<Option<u32>, StorageError> {
        let key = minutes_key(date);
        Ok(self
            .read_number(&key)
            .await?
            .map(|raw| clamp_day_minutes(i64::try_from(raw).unwrap_or(i64::MAX))))
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be written.
    pub async fn store_minutes(
        &self,
        date: CalendarDate,
        minutes: u32,
    ) -> Result<(), StorageError> {
        self.kv
            .set_value(&minutes_key(date), &minutes.to_string())
            .await
    }

    /// Raise the cached total of `date` by minutes that never reached the
    /// backend; returns the new, clamped total.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read or written.
    pub async fn add_cached_minutes(
        &self,
        date: CalendarDate,
        minutes: u32,
    ) -> Result<u32, StorageError> {
        let cached = self.cached_minutes(date).await?.unwrap_or(0);
        let total = clamp_day_minutes(i64::from(cached) + i64::from(minutes));
        self.store_minutes(date, total).await?;
        Ok(total)
    }

    /// Cached totals for every day of `week` that has one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    pub async fn week_minutes(
        &self,
        week: WeekStart,
    ) -> Result<HashMap<CalendarDate, u32>, StorageError> {
        let mut found = HashMap::new();
        for date in week.days() {
            if let Some(minutes) = self.cached_minutes(date).await? {
                found.insert(date, minutes);
            }
        }
        Ok(found)
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be written.
    pub async fn store_unflushed_seconds(
        &self,
        date: CalendarDate,
        seconds: u64,
    ) -> Result<(), StorageError> {
        self.kv
            .set_value(&unflushed_seconds_key(date), &seconds.to_string())
            .await
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    pub async fn unflushed_seconds(&self, date: CalendarDate) -> Result<u64, StorageError> {
        Ok(self
            .read_number(&unflushed_seconds_key(date))
            .await?
            .unwrap_or(0))
    }

    /// Minutes waiting in the Failed-Flush Buffer.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    pub async fn pending_minutes(&self) -> Result<u32, StorageError> {
        Ok(self
            .read_number(FAILED_MINUTES_KEY)
            .await?
            .map_or(0, |raw| u32::try_from(raw).unwrap_or(u32::MAX)))
    }

    /// Append to the Failed-Flush Buffer; returns the new size.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read or written.
    pub async fn add_pending_minutes(&self, minutes: u32) -> Result<u32, StorageError> {
        let pending = self.pending_minutes().await?.saturating_add(minutes);
        self.kv
            .set_value(FAILED_MINUTES_KEY, &pending.to_string())
            .await?;
        Ok(pending)
    }

    /// Remove `minutes` delivered by a retry; anything appended meanwhile
    /// stays. Returns what is left.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read or written.
    pub async fn drain_pending_minutes(&self, minutes: u32) -> Result<u32, StorageError> {
        let remaining = self.pending_minutes().await?.saturating_sub(minutes);
        if remaining == 0 {
            self.kv.delete_value(FAILED_MINUTES_KEY).await?;
        } else {
            self.kv
                .set_value(FAILED_MINUTES_KEY, &remaining.to_string())
                .await?;
        }
        Ok(remaining)
    }

    /// Keep `minutes` of `date` for delivery at the next sign-in; returns
    /// the day's new unsynced total.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read or written.
    pub async fn add_unsynced_minutes(
        &self,
        date: CalendarDate,
        minutes: u32,
    ) -> Result<u32, StorageError> {
        let key = unsynced_minutes_key(date);
        let held = self
            .read_number(&key)
            .await?
            .map_or(0, |raw| u32::try_from(raw).unwrap_or(u32::MAX))
            .saturating_add(minutes);
        self.kv.set_value(&key, &held.to_string()).await?;
        Ok(held)
    }

    /// Unsynced minutes per day, oldest day first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    pub async fn unsynced_minutes(&self) -> Result<Vec<(CalendarDate, u32)>, StorageError> {
        let mut found = Vec::new();
        for key in self.kv.keys_with_prefix(UNSYNCED_PREFIX).await? {
            let suffix = &key[UNSYNCED_PREFIX.len()..];
            let Ok(date) = suffix.parse::<CalendarDate>() else {
                warn!(key, "ignoring unsynced bucket with a malformed date");
                continue;
            };
            let minutes = self
                .read_number(&key)
                .await?
                .map_or(0, |raw| u32::try_from(raw).unwrap_or(u32::MAX));
            if minutes > 0 {
                found.push((date, minutes));
            }
        }
        Ok(found)
    }

    /// Remove `minutes` of `date` once delivered; returns what is left.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read or written.
    pub async fn drain_unsynced_minutes(
        &self,
        date: CalendarDate,
        minutes: u32,
    ) -> Result<u32, StorageError> {
        let key = unsynced_minutes_key(date);
        let remaining = self
            .read_number(&key)
            .await?
            .map_or(0, |raw| u32::try_from(raw).unwrap_or(u32::MAX))
            .saturating_sub(minutes);
        if remaining == 0 {
            self.kv.delete_value(&key).await?;
        } else {
            self.kv.set_value(&key, &remaining.to_string()).await?;
        }
        Ok(remaining)
    }

    /// Local count of finished `module` exercises.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    pub async fn practice_count(&self, module: &str) -> Result<u32, StorageError> {
        Ok(self
            .read_number(&practice_count_key(module))
            .await?
            .map_or(0, |raw| u32::try_from(raw).unwrap_or(u32::MAX)))
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read or written.
    pub async fn bump_practice_count(&self, module: &str) -> Result<u32, StorageError> {
        let count = self.practice_count(module).await?.saturating_add(1);
        self.kv
            .set_value(&practice_count_key(module), &count.to_string())
            .await?;
        Ok(count)
    }

    /// Every local practice counter keyed by module.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    pub async fn practice_counts(&self) -> Result<BTreeMap<String, u32>, StorageError> {
        let mut counts = BTreeMap::new();
        for key in self.kv.keys_with_prefix(PRACTICE_COUNT_PREFIX).await? {
            let module = key[PRACTICE_COUNT_PREFIX.len()..].to_string();
            let count = self.practice_count(&module).await?;
            counts.insert(module, count);
        }
        Ok(counts)
    }

    /// Credential that owns the account-scoped entries, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    pub async fn account(&self) -> Result<Option<Credential>, StorageError> {
        Ok(self
            .kv
            .get_value(ACCOUNT_KEY)
            .await?
            .and_then(Credential::new))
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be written.
    pub async fn set_account(&self, credential: &Credential) -> Result<(), StorageError> {
        self.kv.set_value(ACCOUNT_KEY, credential.as_str()).await
    }

    /// Drop the day totals and practice counters of the current owner.
    ///
    /// Unsynced minutes, the Failed-Flush Buffer and live seconds stay.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read or written.
    pub async fn clear_account_data(&self) -> Result<(), StorageError> {
        let mut removed = 0_usize;
        for prefix in [MINUTES_PREFIX, PRACTICE_COUNT_PREFIX] {
            for key in self.kv.keys_with_prefix(prefix).await? {
                self.kv.delete_value(&key).await?;
                removed += 1;
            }
        }
        debug!(removed, "cleared account cache entries");
        Ok(())
    }

    /// Empty the Failed-Flush Buffer; returns how many minutes it held.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read or written.
    pub async fn discard_pending_minutes(&self) -> Result<u32, StorageError> {
        let pending = self.pending_minutes().await?;
        self.kv.delete_value(FAILED_MINUTES_KEY).await?;
        Ok(pending)
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    pub async fn credential(&self) -> Result<Option<Credential>, StorageError> {
        Ok(self.kv.get_value(TOKEN_KEY).await?.and_then(Credential::new))
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be written.
    pub async fn store_credential(&self, credential: &Credential) -> Result<(), StorageError> {
        self.kv.set_value(TOKEN_KEY, credential.as_str()).await
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be written.
    pub async fn clear_credential(&self) -> Result<(), StorageError> {
        self.kv.delete_value(TOKEN_KEY).await
    }

    // Garbage reads as absent.
    async fn read_number(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let Some(raw) = self.kv.get_value(key).await? else {
            return Ok(None);
        };
        match raw.trim().parse::<u64>() {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(key, value = %raw, error = %err, "ignoring malformed cache entry");
                Ok(None)
            }
        }
    }
}
