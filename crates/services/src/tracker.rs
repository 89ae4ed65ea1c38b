//! Timer-driven runtime of one mounted tracker.
//!
//! `start` spawns four loops (second tick, safety-net flush, background
//! refresh, midnight rollover) under one cancellation token; `shutdown`
//! cancels them, waits for in-flight work and makes a final flush.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use practice_core::Clock;
use practice_core::model::{
    ActivityKind, CalendarDate, SessionClock, Tick, TrackerSessionId, TrackerSettings,
    Visibility, WeekNavigator, WeekView,
};
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::aggregator::WeekAggregator;
use crate::backend::MinuteBackend;
use crate::credentials::Credential;
use crate::error::TrackerError;
use crate::events::TrackerEvent;
use crate::flusher::{self, FlushOutcome, MinuteFlusher, RetryOutcome};
use crate::local_cache::LocalCache;

const EVENT_CAPACITY: usize = 256;

/// Point-in-time view of the session clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSnapshot {
    pub date: CalendarDate,
    pub seconds: u64,
    pub flushed_minutes: u32,
    pub buffered_minutes: u32,
    pub visible: bool,
    pub active: bool,
}

struct Shared {
    session_id: TrackerSessionId,
    clock: Clock,
    settings: TrackerSettings,
    cache: LocalCache,
    flusher: MinuteFlusher,
    aggregator: WeekAggregator,
    session: Mutex<SessionClock>,
    navigator: Mutex<WeekNavigator>,
    events: broadcast::Sender<TrackerEvent>,
}

struct Running {
    cancel: CancellationToken,
    tasks: TaskTracker,
}

pub struct SessionTracker {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl SessionTracker {
    /// Mount a tracker on "now": zero seconds, today's date in the
    /// reference zone, viewing the current week.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Week` if today's week cannot be computed.
    pub fn new(
        clock: Clock,
        settings: TrackerSettings,
        cache: LocalCache,
        backend: Arc<dyn MinuteBackend>,
    ) -> Result<Self, TrackerError> {
        let session_id = TrackerSessionId::new();
        let now = clock.now();
        let today = settings.reference_zone().today(now);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let shared = Shared {
            session_id,
            flusher: MinuteFlusher::new(
                session_id,
                cache.clone(),
                Arc::clone(&backend),
                events.clone(),
            ),
            aggregator: WeekAggregator::new(cache.clone(), backend),
            session: Mutex::new(SessionClock::new(today, now, settings.idle_threshold())),
            navigator: Mutex::new(WeekNavigator::new(today)?),
            clock,
            settings,
            cache,
            events,
        };
        Ok(Self {
            shared: Arc::new(shared),
            running: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn session_id(&self) -> TrackerSessionId {
        self.shared.session_id
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running_slot().is_some()
    }

    #[must_use]
    pub fn snapshot(&self) -> TrackerSnapshot {
        let now = self.shared.clock.now();
        let session = self.shared.session();
        TrackerSnapshot {
            date: session.date(),
            seconds: session.accumulated_seconds(),
            flushed_minutes: session.flushed_minutes(),
            buffered_minutes: session.buffered_minutes(),
            visible: session.monitor().is_visible(),
            active: session.is_active(now),
        }
    }

    /// Seed today's total, build the first week view and spawn the timers.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::AlreadyRunning` if the timers are already up,
    /// or `TrackerError::Storage` if the local cache cannot be used.
    pub async fn start(&self) -> Result<(), TrackerError> {
        if self.is_running() {
            return Err(TrackerError::AlreadyRunning);
        }

        let credential = self.shared.cache.credential().await?;
        let today = self.shared.session().date();
        self.shared
            .aggregator
            .seed_day(today, credential.as_ref())
            .await?;
        self.shared.refresh_week().await?;

        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();
        {
            let mut slot = self.running_slot();
            if slot.is_some() {
                return Err(TrackerError::AlreadyRunning);
            }
            tasks.spawn(tick_loop(Arc::clone(&self.shared), cancel.clone(), tasks.clone()));
            tasks.spawn(flush_loop(Arc::clone(&self.shared), cancel.clone()));
            tasks.spawn(refresh_loop(Arc::clone(&self.shared), cancel.clone()));
            tasks.spawn(midnight_loop(Arc::clone(&self.shared), cancel.clone()));
            *slot = Some(Running { cancel, tasks });
        }

        info!(
            session_id = %self.shared.session_id,
            %today,
            zone = %self.shared.settings.reference_zone(),
            authenticated = credential.is_some(),
            "tracker started"
        );
        Ok(())
    }

    /// Cancel every timer, wait for in-flight flushes and make one final
    /// flush attempt.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::NotRunning` if `start` was not called, or
    /// `TrackerError::Storage` if the final flush cannot use the cache.
    pub async fn shutdown(&self) -> Result<FlushOutcome, TrackerError> {
        let Some(running) = self.running_slot().take() else {
            return Err(TrackerError::NotRunning);
        };
        running.cancel.cancel();
        running.tasks.close();
        running.tasks.wait().await;

        let outcome = self.shared.flush().await?;
        let session = self.shared.snapshot_seconds();
        self.shared
            .cache
            .store_unflushed_seconds(session.0, session.1)
            .await?;
        info!(
            session_id = %self.shared.session_id,
            seconds = session.1,
            ?outcome,
            "tracker stopped"
        );
        Ok(outcome)
    }

    /// Count one second if the user is active. Driven by the tick timer.
    pub async fn tick(&self) -> Tick {
        self.shared.tick().await
    }

    /// Deliver whole minutes not yet reported.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the local cache cannot be used.
    pub async fn flush_now(&self) -> Result<FlushOutcome, TrackerError> {
        self.shared.flush().await
    }

    /// Deliver minutes kept while signed out, then the Failed-Flush Buffer.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the local cache cannot be used.
    pub async fn retry_pending(&self) -> Result<RetryOutcome, TrackerError> {
        self.shared.retry().await
    }

    /// Rebuild the week currently in view.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the local cache cannot be used.
    pub async fn refresh_week(&self) -> Result<WeekView, TrackerError> {
        self.shared.refresh_week().await
    }

    /// # Errors
    ///
    /// Returns `TrackerError` if the week cannot be computed or built.
    pub async fn previous_week(&self) -> Result<WeekView, TrackerError> {
        self.shared.navigator().previous()?;
        self.shared.refresh_week().await
    }

    /// Page forward; `None` when the next week would end after today.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the local cache cannot be used.
    pub async fn next_week(&self) -> Result<Option<WeekView>, TrackerError> {
        if !self.shared.navigator().next() {
            debug!(session_id = %self.shared.session_id, "next week is not available yet");
            return Ok(None);
        }
        self.shared.refresh_week().await.map(Some)
    }

    /// # Errors
    ///
    /// Returns `TrackerError` if the week cannot be computed or built.
    pub async fn current_week(&self) -> Result<WeekView, TrackerError> {
        self.shared.navigator().current_week()?;
        self.shared.refresh_week().await
    }

    #[must_use]
    pub fn can_go_next(&self) -> bool {
        self.shared.navigator().can_go_next()
    }

    #[must_use]
    pub fn is_current_week(&self) -> bool {
        self.shared.navigator().is_current_week()
    }

    pub fn record_activity(&self, kind: ActivityKind) {
        let now = self.shared.clock.now();
        if self.shared.session().record_activity(kind, now) {
            debug!(
                session_id = %self.shared.session_id,
                activity = %kind,
                "activity resumed after idle"
            );
        }
    }

    /// Update visibility; becoming visible counts as coming to the
    /// foreground and retries buffered minutes.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the retry cannot use the cache.
    pub async fn set_visibility(&self, visibility: Visibility) -> Result<(), TrackerError> {
        let changed = self.shared.session().set_visibility(visibility);
        if changed && visibility == Visibility::Visible {
            self.shared.retry().await?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the retry cannot use the cache.
    pub async fn foreground(&self) -> Result<(), TrackerError> {
        self.set_visibility(Visibility::Visible).await
    }

    /// Store the credential and resume remote sync: seed today, deliver the
    /// unsynced and buffered minutes, flush waiting minutes and refresh the
    /// week.
    ///
    /// When a different account owned the cache, its buffered minutes are
    /// delivered with its own credential (or dropped) and its cached totals
    /// are cleared first.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the local cache cannot be used.
    pub async fn login(&self, credential: &Credential) -> Result<(), TrackerError> {
        let cache = &self.shared.cache;
        match cache.account().await? {
            Some(previous) if previous != *credential => {
                info!(session_id = %self.shared.session_id, "switching accounts; clearing cached totals");
                self.shared
                    .flusher
                    .settle_previous_account(&self.shared.session, &previous)
                    .await?;
                cache.clear_account_data().await?;
            }
            _ => {}
        }
        cache.set_account(credential).await?;
        cache.store_credential(credential).await?;
        info!(session_id = %self.shared.session_id, "credential stored; resuming sync");

        let today = self.shared.session().date();
        let seconds = self.shared.session().accumulated_seconds();
        self.shared
            .aggregator
            .seed_day(today, Some(credential))
            .await?;
        self.shared.cache.store_unflushed_seconds(today, seconds).await?;
        self.shared.retry().await?;
        self.shared.flush().await?;
        self.shared.refresh_week().await?;
        Ok(())
    }

    /// Deliver what can still be delivered with the current credential,
    /// then forget the credential and the account's cached totals.
    ///
    /// Minutes left in the Failed-Flush Buffer stay bound to this account.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the local cache cannot be used.
    pub async fn logout(&self) -> Result<(), TrackerError> {
        if self.shared.cache.credential().await?.is_some() {
            self.shared.flush().await?;
            self.shared.retry().await?;
        }
        self.shared.cache.clear_account_data().await?;
        self.shared.cache.clear_credential().await?;
        info!(session_id = %self.shared.session_id, "credential cleared; tracking locally");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the local cache cannot be read.
    pub async fn is_authenticated(&self) -> Result<bool, TrackerError> {
        Ok(self.shared.cache.credential().await?.is_some())
    }

    /// Start a new day if the reference-zone date moved on.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError` if the final flush or the refresh fails.
    pub async fn roll_over_if_needed(&self) -> Result<bool, TrackerError> {
        self.shared.roll_over_if_needed().await
    }

    fn running_slot(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionTracker {
    fn drop(&mut self) {
        if let Some(running) = self.running_slot().take() {
            running.cancel.cancel();
        }
    }
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, SessionClock> {
        flusher::lock(&self.session)
    }

    fn navigator(&self) -> MutexGuard<'_, WeekNavigator> {
        self.navigator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_seconds(&self) -> (CalendarDate, u64) {
        let session = self.session();
        (session.date(), session.accumulated_seconds())
    }

    fn day_changed(&self) -> bool {
        let today = self.settings.reference_zone().today(self.clock.now());
        today != self.session().date()
    }

    // A second after midnight belongs to the new day, so the rollover
    // completes before it is counted.
    async fn tick(&self) -> Tick {
        if self.day_changed() {
            if let Err(err) = self.roll_over_if_needed().await {
                warn!(session_id = %self.session_id, error = %err, "rollover failed");
            }
        }
        let now = self.clock.now();
        let (tick, date) = {
            let mut session = self.session();
            (session.tick(now), session.date())
        };
        if tick.counted {
            let _ = self.events.send(TrackerEvent::Tick {
                seconds: tick.seconds,
            });
            if let Err(err) = self.cache.store_unflushed_seconds(date, tick.seconds).await {
                warn!(session_id = %self.session_id, error = %err, "could not store live seconds");
            }
        }
        tick
    }

    async fn flush(&self) -> Result<FlushOutcome, TrackerError> {
        let outcome = self.flusher.flush(&self.session).await?;
        if matches!(outcome, FlushOutcome::Delivered { .. }) {
            self.refresh_week().await?;
        }
        Ok(outcome)
    }

    async fn retry(&self) -> Result<RetryOutcome, TrackerError> {
        let uploaded = self.flusher.upload_unsynced(&self.session).await?;
        let outcome = self.flusher.retry_pending(&self.session).await?;
        if uploaded > 0 || matches!(outcome, RetryOutcome::Delivered { .. }) {
            self.refresh_week().await?;
        }
        Ok(outcome)
    }

    async fn refresh_week(&self) -> Result<WeekView, TrackerError> {
        let (week, today) = {
            let navigator = self.navigator();
            (navigator.week(), navigator.today())
        };
        let live_minutes = {
            let session = self.session();
            if session.date() == today {
                session.whole_minutes()
            } else {
                0
            }
        };
        let credential = self.cache.credential().await?;
        let view = self
            .aggregator
            .get_week(week, today, live_minutes, credential.as_ref())
            .await?;
        let _ = self.events.send(TrackerEvent::WeekRefreshed(view.clone()));
        Ok(view)
    }

    async fn roll_over_if_needed(&self) -> Result<bool, TrackerError> {
        let today = self.settings.reference_zone().today(self.clock.now());
        let Some(previous) = self.flusher.roll_over(&self.session, today).await? else {
            return Ok(false);
        };
        self.navigator().set_today(today)?;
        let _ = self.events.send(TrackerEvent::DayRolledOver {
            previous,
            current: today,
        });
        let credential = self.cache.credential().await?;
        self.aggregator.seed_day(today, credential.as_ref()).await?;
        self.refresh_week().await?;
        Ok(true)
    }
}

//
// ─── LOOPS ─────────────────────────────────────────────────────────────────────
//

fn std_duration(duration: chrono::Duration) -> std::time::Duration {
    duration.to_std().unwrap_or(std::time::Duration::from_secs(1))
}

async fn tick_loop(shared: Arc<Shared>, cancel: CancellationToken, tasks: TaskTracker) {
    let period = std_duration(shared.settings.tick_interval());
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(session_id = %shared.session_id, "tick loop cancelled");
                break;
            }
            _ = ticker.tick() => {
                let tick = shared.tick().await;
                if tick.minute_boundary {
                    // Spawned so a slow backend never delays the next second.
                    let shared = Arc::clone(&shared);
                    tasks.spawn(async move {
                        if let Err(err) = shared.flush().await {
                            warn!(session_id = %shared.session_id, error = %err, "boundary flush failed");
                        }
                    });
                }
            }
        }
    }
}

async fn flush_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let period = std_duration(shared.settings.flush_interval());
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = shared.flush().await {
                    warn!(session_id = %shared.session_id, error = %err, "safety-net flush failed");
                }
            }
        }
    }
}

async fn refresh_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let period = std_duration(shared.settings.refresh_interval());
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = shared.retry().await {
                    warn!(session_id = %shared.session_id, error = %err, "retry failed");
                }
                if let Err(err) = shared.refresh_week().await {
                    warn!(session_id = %shared.session_id, error = %err, "week refresh failed");
                }
            }
        }
    }
}

async fn midnight_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let zone = shared.settings.reference_zone();
    loop {
        let now = shared.clock.now();
        let wait = (zone.next_midnight(now) - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(wait) => {
                if let Err(err) = shared.roll_over_if_needed().await {
                    warn!(session_id = %shared.session_id, error = %err, "midnight rollover failed");
                }
                // Clock may lag the timer; never spin on the same instant.
                if wait.is_zero() {
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}
