use std::sync::Arc;

use practice_core::model::{CalendarDate, WeekSources, WeekStart, WeekView};
use tracing::{debug, warn};

use crate::backend::MinuteBackend;
use crate::credentials::Credential;
use crate::error::TrackerError;
use crate::local_cache::LocalCache;

/// Builds week views from the local cache and the backend.
#[derive(Clone)]
pub struct WeekAggregator {
    cache: LocalCache,
    backend: Arc<dyn MinuteBackend>,
}

impl WeekAggregator {
    #[must_use]
    pub fn new(cache: LocalCache, backend: Arc<dyn MinuteBackend>) -> Self {
        Self { cache, backend }
    }

    /// Build the view for `week`.
    ///
    /// With a credential the backend's range is fetched and written through
    /// to the cache; without one, or if the fetch fails, the cache alone is
    /// used.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the local cache cannot be used.
    pub async fn get_week(
        &self,
        week: WeekStart,
        today: CalendarDate,
        live_minutes: u32,
        credential: Option<&Credential>,
    ) -> Result<WeekView, TrackerError> {
        let mut sources = WeekSources {
            local: self.cache.week_minutes(week).await?,
            live_minutes,
            ..WeekSources::default()
        };

        if let Some(credential) = credential {
            match self
                .backend
                .minutes_for_range(credential, week.start(), week.end())
                .await
            {
                Ok(records) => {
                    for record in records.into_iter().filter(|r| week.contains(r.date())) {
                        let local = sources.local.get(&record.date()).copied().unwrap_or(0);
                        self.cache
                            .store_minutes(record.date(), local.max(record.minutes()))
                            .await?;
                        sources.remote.insert(record.date(), record.minutes());
                    }
                }
                Err(err) => {
                    warn!(week = %week, error = %err, "week fetch failed; using cached totals");
                }
            }
        } else {
            debug!(week = %week, "not logged in; using cached totals");
        }

        Ok(WeekView::build(week, today, &sources))
    }

    /// Seed today's cached total from the backend and zero the live seconds.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the local cache cannot be used.
    pub async fn seed_day(
        &self,
        date: CalendarDate,
        credential: Option<&Credential>,
    ) -> Result<(), TrackerError> {
        self.cache.store_unflushed_seconds(date, 0).await?;
        let Some(credential) = credential else {
            return Ok(());
        };
        match self.backend.minutes_for_date(credential, date).await {
            Ok(record) => {
                let cached = self.cache.cached_minutes(date).await?.unwrap_or(0);
                self.cache
                    .store_minutes(date, cached.max(record.minutes()))
                    .await?;
            }
            Err(err) => warn!(%date, error = %err, "could not seed today's total"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use practice_core::model::UserId;
    use storage::repository::{DailyMinutesRepository, InMemoryRepository};

    use crate::backend::RepositoryBackend;

    fn date(d: u32) -> CalendarDate {
        CalendarDate::from_ymd(2024, 5, d).unwrap()
    }

    fn setup() -> (WeekAggregator, LocalCache, InMemoryRepository) {
        let repo = InMemoryRepository::new();
        let cache = LocalCache::new(Arc::new(repo.clone()));
        let backend = Arc::new(RepositoryBackend::new(
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        ));
        (WeekAggregator::new(cache.clone(), backend), cache, repo)
    }

    #[tokio::test]
    async fn remote_wins_over_lagging_cache_and_is_written_through() {
        let (aggregator, cache, repo) = setup();
        let alice = UserId::new("alice").unwrap();
        cache.store_minutes(date(1), 12).await.unwrap();
        repo.increment_minutes(&alice, date(1), 15).await.unwrap();

        let credential = Credential::new("alice").unwrap();
        let week = WeekStart::containing(date(1)).unwrap();
        let view = aggregator
            .get_week(week, date(3), 0, Some(&credential))
            .await
            .unwrap();

        assert_eq!(view.day(date(1)).unwrap().minutes, 15);
        assert_eq!(cache.cached_minutes(date(1)).await.unwrap(), Some(15));
    }

    #[tokio::test]
    async fn signed_out_view_uses_cache_only() {
        let (aggregator, cache, repo) = setup();
        repo.increment_minutes(&UserId::new("alice").unwrap(), date(1), 40)
            .await
            .unwrap();
        cache.store_minutes(date(2), 7).await.unwrap();

        let week = WeekStart::containing(date(1)).unwrap();
        let view = aggregator.get_week(week, date(3), 0, None).await.unwrap();
        assert_eq!(view.day(date(1)).unwrap().minutes, 0);
        assert_eq!(view.day(date(2)).unwrap().minutes, 7);
    }

    #[tokio::test]
    async fn seeding_zeroes_live_seconds_and_keeps_larger_total() {
        let (aggregator, cache, repo) = setup();
        let credential = Credential::new("alice").unwrap();
        repo.increment_minutes(&UserId::new("alice").unwrap(), date(8), 20)
            .await
            .unwrap();
        cache.store_unflushed_seconds(date(8), 33).await.unwrap();

        aggregator.seed_day(date(8), Some(&credential)).await.unwrap();
        assert_eq!(cache.unflushed_seconds(date(8)).await.unwrap(), 0);
        assert_eq!(cache.cached_minutes(date(8)).await.unwrap(), Some(20));
    }
}
