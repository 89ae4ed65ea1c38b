use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use practice_core::Clock;
use practice_core::model::{
    ActivityKind, CalendarDate, DailyMinuteRecord, TrackerSettings, TrackerSettingsDraft, UserId,
    Visibility, whole_minutes,
};
use practice_core::time::{fixed_now, manual_clock};
use services::{
    AppServices, BackendError, Credential, FlushOutcome, LocalCache, MinuteBackend,
    RepositoryBackend, SessionTracker, TrackerError, TrackerEvent,
};
use storage::repository::{DailyMinutesRepository, InMemoryRepository};

fn alice() -> Credential {
    Credential::new("alice").unwrap()
}

async fn signed_in(services: &AppServices) {
    services.cache().store_credential(&alice()).await.unwrap();
}

/// Local repository backend whose deliveries can fail or never complete.
struct SwitchableBackend {
    inner: RepositoryBackend,
    offline: AtomicBool,
    hung: AtomicBool,
}

#[async_trait]
impl MinuteBackend for SwitchableBackend {
    async fn increment_minutes(
        &self,
        credential: &Credential,
        date: CalendarDate,
        minutes: u32,
    ) -> Result<DailyMinuteRecord, BackendError> {
        if self.hung.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::InvalidResponse("offline".into()));
        }
        self.inner.increment_minutes(credential, date, minutes).await
    }

    async fn minutes_for_range(
        &self,
        credential: &Credential,
        start: CalendarDate,
        end: CalendarDate,
    ) -> Result<Vec<DailyMinuteRecord>, BackendError> {
        self.inner.minutes_for_range(credential, start, end).await
    }

    async fn minutes_for_date(
        &self,
        credential: &Credential,
        date: CalendarDate,
    ) -> Result<DailyMinuteRecord, BackendError> {
        self.inner.minutes_for_date(credential, date).await
    }
}

struct Rig {
    repo: InMemoryRepository,
    cache: LocalCache,
    backend: Arc<SwitchableBackend>,
}

impl Rig {
    fn new() -> Self {
        let repo = InMemoryRepository::new();
        let backend = Arc::new(SwitchableBackend {
            inner: RepositoryBackend::new(Arc::new(repo.clone()), Arc::new(repo.clone())),
            offline: AtomicBool::new(false),
            hung: AtomicBool::new(false),
        });
        Self {
            cache: LocalCache::new(Arc::new(repo.clone())),
            repo,
            backend,
        }
    }

    fn tracker(&self, settings: TrackerSettings) -> SessionTracker {
        SessionTracker::new(
            manual_clock(),
            settings,
            self.cache.clone(),
            self.backend.clone(),
        )
        .unwrap()
    }

    async fn durable(&self, date: CalendarDate) -> u32 {
        let alice = UserId::new("alice").unwrap();
        self.repo
            .minutes_for_date(&alice, date)
            .await
            .unwrap()
            .map_or(0, |record| record.minutes())
    }
}

#[tokio::test(start_paused = true)]
async fn continuous_activity_flushes_two_minutes_once() {
    let services = AppServices::in_memory(Clock::default_clock(), TrackerSettings::default());
    signed_in(&services).await;
    let tracker = services.tracker().unwrap();
    let mut events = tracker.subscribe();

    tracker.start().await.unwrap();
    assert!(matches!(tracker.start().await, Err(TrackerError::AlreadyRunning)));

    tokio::time::sleep(Duration::from_millis(125_500)).await;
    let outcome = tracker.shutdown().await.unwrap();
    assert_eq!(outcome, FlushOutcome::Nothing);

    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.seconds, 125);
    assert_eq!(snapshot.flushed_minutes, 2);

    let mut flushed = 0;
    let mut ticks = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            TrackerEvent::Flushed { minutes, .. } => flushed += minutes,
            TrackerEvent::Tick { .. } => ticks += 1,
            _ => {}
        }
    }
    assert_eq!(flushed, 2);
    assert!(ticks > 0);

    let week = services.week_report(0).await.unwrap();
    assert_eq!(week.day(services.today()).unwrap().minutes, 2);
    assert!(matches!(tracker.shutdown().await, Err(TrackerError::NotRunning)));
}

#[tokio::test]
async fn idle_user_stops_accumulating() {
    let clock = manual_clock();
    let services = AppServices::in_memory(clock.clone(), TrackerSettings::default());
    let tracker = services.tracker().unwrap();

    let mut clock = clock;
    for _ in 0..400 {
        clock.advance(ChronoDuration::seconds(1));
        tracker.tick().await;
    }
    assert_eq!(tracker.snapshot().seconds, 299);
    assert!(!tracker.snapshot().active);

    tracker.record_activity(ActivityKind::PointerMove);
    clock.advance(ChronoDuration::seconds(1));
    assert!(tracker.tick().await.counted);
}

#[tokio::test]
async fn hidden_tracker_does_not_count() {
    let clock = manual_clock();
    let services = AppServices::in_memory(clock.clone(), TrackerSettings::default());
    let tracker = services.tracker().unwrap();

    tracker.set_visibility(Visibility::Hidden).await.unwrap();
    let mut clock = clock;
    for _ in 0..30 {
        clock.advance(ChronoDuration::seconds(1));
        tracker.record_activity(ActivityKind::Scroll);
        assert!(!tracker.tick().await.counted);
    }
    tracker.foreground().await.unwrap();
    clock.advance(ChronoDuration::seconds(1));
    assert!(tracker.tick().await.counted);
    assert_eq!(tracker.snapshot().seconds, 1);
}

#[tokio::test]
async fn signed_out_minutes_are_delivered_after_login() {
    let clock = manual_clock();
    let services = AppServices::in_memory(clock.clone(), TrackerSettings::default());
    let tracker = services.tracker().unwrap();
    assert!(!tracker.is_authenticated().await.unwrap());

    let mut clock = clock;
    for _ in 0..150 {
        clock.advance(ChronoDuration::seconds(1));
        tracker.record_activity(ActivityKind::KeyPress);
        tracker.tick().await;
    }
    let today = services.today();
    assert_eq!(
        tracker.flush_now().await.unwrap(),
        FlushOutcome::KeptLocal {
            date: today,
            minutes: 2,
            total: 2,
        }
    );
    assert_eq!(services.cache().pending_minutes().await.unwrap(), 0);
    assert_eq!(
        services.cache().unsynced_minutes().await.unwrap(),
        vec![(today, 2)]
    );

    tracker.login(&alice()).await.unwrap();
    assert!(tracker.is_authenticated().await.unwrap());
    assert_eq!(tracker.snapshot().flushed_minutes, 2);
    assert_eq!(tracker.flush_now().await.unwrap(), FlushOutcome::Nothing);
    assert!(services.cache().unsynced_minutes().await.unwrap().is_empty());
    assert_eq!(services.cache().cached_minutes(today).await.unwrap(), Some(2));

    tracker.logout().await.unwrap();
    assert!(!tracker.is_authenticated().await.unwrap());
    assert_eq!(services.cache().cached_minutes(today).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn signed_out_minutes_survive_a_remount_until_login() {
    let rig = Rig::new();
    let first = rig.tracker(TrackerSettings::default());
    first.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(180_500)).await;
    assert_eq!(first.shutdown().await.unwrap(), FlushOutcome::Nothing);

    let today = first.snapshot().date;
    assert_eq!(rig.cache.unsynced_minutes().await.unwrap(), vec![(today, 3)]);
    let signed_out = first.refresh_week().await.unwrap();
    assert_eq!(signed_out.day(today).unwrap().minutes, 3);
    drop(first);

    let second = rig.tracker(TrackerSettings::default());
    second.start().await.unwrap();
    assert_eq!(second.snapshot().seconds, 0);
    assert_eq!(
        second.refresh_week().await.unwrap().day(today).unwrap().minutes,
        3
    );

    second.login(&alice()).await.unwrap();
    assert_eq!(rig.durable(today).await, 3);
    assert!(rig.cache.unsynced_minutes().await.unwrap().is_empty());
    assert_eq!(rig.cache.cached_minutes(today).await.unwrap(), Some(3));
    assert_eq!(
        second.refresh_week().await.unwrap().day(today).unwrap().minutes,
        3
    );
    second.shutdown().await.unwrap();
    assert_eq!(rig.durable(today).await, 3);
}

#[tokio::test]
async fn another_account_never_sees_the_previous_totals() {
    let services = AppServices::in_memory(manual_clock(), TrackerSettings::default());
    let tracker = services.tracker().unwrap();
    let today = services.today();
    let bob = Credential::new("bob").unwrap();

    tracker.login(&alice()).await.unwrap();
    services.cache().store_minutes(today, 50).await.unwrap();
    let view = tracker.refresh_week().await.unwrap();
    assert_eq!(view.day(today).unwrap().minutes, 50);

    tracker.logout().await.unwrap();
    tracker.login(&bob).await.unwrap();
    let view = tracker.refresh_week().await.unwrap();
    assert_eq!(view.day(today).unwrap().minutes, 0);

    // switching without a logout in between clears the cache as well
    services.cache().store_minutes(today, 7).await.unwrap();
    tracker.login(&alice()).await.unwrap();
    let report = services.week_report(0).await.unwrap();
    assert_eq!(report.day(today).unwrap().minutes, 0);
}

#[tokio::test(start_paused = true)]
async fn refresh_timer_delivers_minutes_buffered_while_offline() {
    let rig = Rig::new();
    rig.cache.store_credential(&alice()).await.unwrap();
    rig.backend.offline.store(true, Ordering::SeqCst);
    let tracker = rig.tracker(TrackerSettings::default());
    tracker.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(150_500)).await;
    let today = tracker.snapshot().date;
    assert_eq!(rig.cache.pending_minutes().await.unwrap(), 2);
    assert_eq!(rig.durable(today).await, 0);

    // Back online: later boundaries deliver directly and the 5-minute
    // refresh picks up the buffer.
    rig.backend.offline.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(150)).await;

    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.seconds, 300);
    assert_eq!(rig.cache.pending_minutes().await.unwrap(), 0);
    assert_eq!(rig.durable(today).await, whole_minutes(snapshot.seconds));
    assert_eq!(snapshot.flushed_minutes, 5);
    assert_eq!(snapshot.buffered_minutes, 0);
    tracker.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn safety_net_timer_delivers_on_its_own() {
    let rig = Rig::new();
    rig.cache.store_credential(&alice()).await.unwrap();
    // Seconds come from direct ticks below, which never flush.
    let settings = TrackerSettingsDraft {
        tick_interval_secs: Some(120),
        flush_interval_secs: Some(120),
        ..TrackerSettingsDraft::default()
    }
    .validate()
    .unwrap();
    let tracker = rig.tracker(settings);
    tracker.start().await.unwrap();

    for _ in 0..90 {
        tracker.tick().await;
    }
    let today = tracker.snapshot().date;
    assert_eq!(rig.durable(today).await, 0);

    tokio::time::sleep(Duration::from_millis(120_500)).await;
    assert_eq!(rig.durable(today).await, 1);
    assert_eq!(tracker.snapshot().flushed_minutes, 1);
    tracker.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn hung_delivery_does_not_stall_the_second_counter() {
    let rig = Rig::new();
    rig.cache.store_credential(&alice()).await.unwrap();
    rig.backend.hung.store(true, Ordering::SeqCst);
    let tracker = rig.tracker(TrackerSettings::default());
    tracker.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(150_500)).await;
    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.seconds, 150);
    assert_eq!(snapshot.flushed_minutes, 0);
    assert_eq!(rig.durable(snapshot.date).await, 0);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(tracker.snapshot().seconds, 180);
    // shutdown would wait for the stuck delivery; dropping cancels the timers
    drop(tracker);
}

#[tokio::test]
async fn week_navigation_is_bounded_by_today() {
    let services = AppServices::in_memory(manual_clock(), TrackerSettings::default());
    let tracker = services.tracker().unwrap();

    // Wednesday: the current week ends on Saturday, so paging forward stops.
    assert!(tracker.is_current_week());
    assert!(!tracker.can_go_next());
    assert!(tracker.next_week().await.unwrap().is_none());

    let previous = tracker.previous_week().await.unwrap();
    assert!(!previous.is_current());
    assert_eq!(previous.encouragement(), "Great Effort!");

    let current = tracker.current_week().await.unwrap();
    assert!(current.is_current());
    assert_eq!(current.range_label(), "Nov 12 - 18, 2023");
}

#[tokio::test]
async fn midnight_rollover_flushes_old_day_and_resets() {
    let clock = manual_clock();
    let services = AppServices::in_memory(clock.clone(), TrackerSettings::default());
    signed_in(&services).await;
    let tracker = services.tracker().unwrap();
    let mut events = tracker.subscribe();
    let first_day = services.today();

    let mut clock = clock;
    for _ in 0..90 {
        clock.advance(ChronoDuration::seconds(1));
        tracker.record_activity(ActivityKind::Click);
        tracker.tick().await;
    }
    assert!(!tracker.roll_over_if_needed().await.unwrap());

    // fixed_now() is 03:13:20 in Karachi; jump past the next midnight.
    let midnight = services.settings().reference_zone().next_midnight(fixed_now());
    clock.advance(midnight - clock.now() + ChronoDuration::seconds(1));
    assert!(tracker.roll_over_if_needed().await.unwrap());

    let snapshot = tracker.snapshot();
    assert_ne!(snapshot.date, first_day);
    assert_eq!(snapshot.seconds, 0);
    assert_eq!(snapshot.flushed_minutes, 0);

    assert_eq!(
        services.cache().cached_minutes(first_day).await.unwrap(),
        Some(1)
    );

    let mut rolled = false;
    while let Ok(event) = events.try_recv() {
        if let TrackerEvent::DayRolledOver { previous, current } = event {
            assert_eq!(previous, first_day);
            assert_eq!(current, snapshot.date);
            rolled = true;
        }
    }
    assert!(rolled);
}

#[tokio::test]
async fn first_tick_after_midnight_counts_for_the_new_day() {
    let clock = manual_clock();
    let services = AppServices::in_memory(clock.clone(), TrackerSettings::default());
    signed_in(&services).await;
    let tracker = services.tracker().unwrap();
    let first_day = services.today();

    let mut clock = clock;
    for _ in 0..90 {
        clock.advance(ChronoDuration::seconds(1));
        tracker.record_activity(ActivityKind::KeyPress);
        tracker.tick().await;
    }

    let midnight = services.settings().reference_zone().next_midnight(fixed_now());
    clock.advance(midnight - clock.now() + ChronoDuration::seconds(1));
    tracker.record_activity(ActivityKind::KeyPress);
    let tick = tracker.tick().await;

    assert!(tick.counted);
    assert_eq!(tick.seconds, 1);
    let snapshot = tracker.snapshot();
    assert_ne!(snapshot.date, first_day);
    assert_eq!(snapshot.seconds, 1);
    assert_eq!(
        services.cache().cached_minutes(first_day).await.unwrap(),
        Some(1)
    );
    assert_eq!(
        services.cache().unflushed_seconds(snapshot.date).await.unwrap(),
        1
    );
}
