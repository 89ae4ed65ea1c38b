use std::sync::Arc;

use practice_core::model::{CalendarDate, TrackerSettings, WeekStart, WeekView};
use storage::repository::Storage;
use tracing::info;

use crate::Clock;
use crate::aggregator::WeekAggregator;
use crate::backend::{
    BackendConfig, HttpMinuteBackend, MinuteBackend, ProgressBackend, RepositoryBackend,
};
use crate::error::{AppServicesError, TrackerError};
use crate::local_cache::LocalCache;
use crate::progress::ProgressService;
use crate::tracker::SessionTracker;

/// Assembles the storage, cache and backends behind the app's commands.
#[derive(Clone)]
pub struct AppServices {
    clock: Clock,
    settings: TrackerSettings,
    cache: LocalCache,
    backend: Arc<dyn MinuteBackend>,
    progress: Arc<dyn ProgressBackend>,
    remote: bool,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// With a `BackendConfig` minutes go to the remote API; otherwise the
    /// `SQLite` daily minutes table is the durable store.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization or HTTP client
    /// setup fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        settings: TrackerSettings,
        backend: Option<BackendConfig>,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Self::from_storage(storage, clock, settings, backend)
    }

    #[must_use]
    pub fn in_memory(clock: Clock, settings: TrackerSettings) -> Self {
        let storage = Storage::in_memory();
        let local = Arc::new(RepositoryBackend::new(
            Arc::clone(&storage.daily_minutes),
            Arc::clone(&storage.progress),
        ));
        Self {
            clock,
            settings,
            cache: LocalCache::new(storage.kv),
            backend: local.clone(),
            progress: local,
            remote: false,
        }
    }

    fn from_storage(
        storage: Storage,
        clock: Clock,
        settings: TrackerSettings,
        config: Option<BackendConfig>,
    ) -> Result<Self, AppServicesError> {
        let remote = config.is_some();
        let backend: Arc<dyn MinuteBackend>;
        let progress: Arc<dyn ProgressBackend>;
        match config {
            Some(config) => {
                info!(base_url = %config.base_url(), "using remote minute backend");
                let http = Arc::new(HttpMinuteBackend::new(config)?);
                backend = http.clone();
                progress = http;
            }
            None => {
                info!("using local minute backend");
                let local = Arc::new(RepositoryBackend::new(
                    Arc::clone(&storage.daily_minutes),
                    Arc::clone(&storage.progress),
                ));
                backend = local.clone();
                progress = local;
            }
        }
        Ok(Self {
            clock,
            settings,
            cache: LocalCache::new(storage.kv),
            backend,
            progress,
            remote,
        })
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    #[must_use]
    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    #[must_use]
    pub fn cache(&self) -> LocalCache {
        self.cache.clone()
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.remote
    }

    #[must_use]
    pub fn aggregator(&self) -> WeekAggregator {
        WeekAggregator::new(self.cache.clone(), Arc::clone(&self.backend))
    }

    #[must_use]
    pub fn progress(&self) -> ProgressService {
        ProgressService::new(
            self.clock.clone(),
            self.cache.clone(),
            Arc::clone(&self.progress),
        )
    }

    /// Canonical "today" in the reference zone.
    #[must_use]
    pub fn today(&self) -> CalendarDate {
        self.settings.reference_zone().today(self.clock.now())
    }

    /// Mount a new tracker over these services.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Week` if today's week cannot be computed.
    pub fn tracker(&self) -> Result<SessionTracker, TrackerError> {
        SessionTracker::new(
            self.clock.clone(),
            self.settings.clone(),
            self.cache.clone(),
            Arc::clone(&self.backend),
        )
    }

    /// Week view without a running tracker, `weeks_back` weeks before the
    /// current one.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError` if the week cannot be computed or the cache
    /// cannot be read.
    pub async fn week_report(&self, weeks_back: u32) -> Result<WeekView, TrackerError> {
        let today = self.today();
        let mut week = WeekStart::containing(today)?;
        for _ in 0..weeks_back {
            week = week.previous()?;
        }
        let credential = self.cache.credential().await?;
        self.aggregator()
            .get_week(week, today, 0, credential.as_ref())
            .await
    }
}
