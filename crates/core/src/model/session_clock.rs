//! In-memory state of one mounted tracker.
//!
//! Holds the Activity Monitor (last interaction + visibility), the Second
//! Accumulator and the bookkeeping the Minute Flusher needs to hand each
//! whole minute to exactly one delivery path. Nothing here is durable: a
//! reload starts from zero and only the per-day minute totals survive.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::date::CalendarDate;
use crate::model::minutes::{SECONDS_PER_MINUTE, whole_minutes};

/// User interactions that count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityKind {
    PointerMove,
    KeyPress,
    Click,
    Scroll,
    TouchStart,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 5] = [
        ActivityKind::PointerMove,
        ActivityKind::KeyPress,
        ActivityKind::Click,
        ActivityKind::Scroll,
        ActivityKind::TouchStart,
    ];

    /// DOM event name of the interaction.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::PointerMove => "mousemove",
            ActivityKind::KeyPress => "keydown",
            ActivityKind::Click => "click",
            ActivityKind::Scroll => "scroll",
            ActivityKind::TouchStart => "touchstart",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown activity event: {0}")]
pub struct UnknownActivityError(pub String);

impl FromStr for ActivityKind {
    type Err = UnknownActivityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == needle)
            .ok_or_else(|| UnknownActivityError(needle.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    Visible,
    Hidden,
}

//
// ─── ACTIVITY MONITOR ──────────────────────────────────────────────────────────
//

/// Classifies a moment as active or idle, visible or hidden.
///
/// A moment is active iff the surface is visible and the last interaction
/// happened less than `idle_threshold` ago.
#[derive(Debug, Clone)]
pub struct ActivityMonitor {
    last_activity_at: DateTime<Utc>,
    visibility: Visibility,
    idle_threshold: Duration,
}

impl ActivityMonitor {
    /// `now` seeds the last-activity timestamp, so the first tick after mount
    /// is active even if no event fired yet.
    #[must_use]
    pub fn new(now: DateTime<Utc>, idle_threshold: Duration) -> Self {
        Self {
            last_activity_at: now,
            visibility: Visibility::Visible,
            idle_threshold,
        }
    }

    /// Record an interaction. Returns true when it ends an idle stretch.
    pub fn record(&mut self, _kind: ActivityKind, at: DateTime<Utc>) -> bool {
        let resumed = !self.within_threshold(at);
        if at > self.last_activity_at {
            self.last_activity_at = at;
        }
        resumed
    }

    /// Update visibility. Returns true if it changed.
    pub fn set_visibility(&mut self, visibility: Visibility) -> bool {
        let changed = self.visibility != visibility;
        self.visibility = visibility;
        changed
    }

    #[must_use]
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visibility == Visibility::Visible
    }

    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.is_visible() && self.within_threshold(now)
    }

    #[must_use]
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    #[must_use]
    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }

    fn within_threshold(&self, now: DateTime<Utc>) -> bool {
        now - self.last_activity_at < self.idle_threshold
    }
}

//
// ─── SESSION CLOCK ─────────────────────────────────────────────────────────────
//

/// Result of one accumulator tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub counted: bool,
    pub seconds: u64,
    /// The counted second landed on a multiple of 60.
    pub minute_boundary: bool,
}

/// Whole minutes reserved for one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushClaim {
    pub date: CalendarDate,
    pub minutes: u32,
}

/// Per-tab accumulator plus flush bookkeeping.
///
/// Every whole minute is owned by exactly one of three buckets:
/// delivered (`flushed_minutes`), handed to a durable local bucket such as
/// the retry buffer (`buffered_minutes`), or still unclaimed. Claims are
/// computed against the first two, so the boundary path can never resubmit
/// a buffered minute.
#[derive(Debug, Clone)]
pub struct SessionClock {
    date: CalendarDate,
    accumulated_seconds: u64,
    flushed_minutes: u32,
    buffered_minutes: u32,
    monitor: ActivityMonitor,
}

impl SessionClock {
    #[must_use]
    pub fn new(date: CalendarDate, now: DateTime<Utc>, idle_threshold: Duration) -> Self {
        Self {
            date,
            accumulated_seconds: 0,
            flushed_minutes: 0,
            buffered_minutes: 0,
            monitor: ActivityMonitor::new(now, idle_threshold),
        }
    }

    /// Reference-zone date the current counters belong to.
    #[must_use]
    pub fn date(&self) -> CalendarDate {
        self.date
    }

    #[must_use]
    pub fn accumulated_seconds(&self) -> u64 {
        self.accumulated_seconds
    }

    /// Minutes confirmed by the persistence backend this session.
    #[must_use]
    pub fn flushed_minutes(&self) -> u32 {
        self.flushed_minutes
    }

    /// Minutes whose delivery failed and now belong to the retry path.
    #[must_use]
    pub fn buffered_minutes(&self) -> u32 {
        self.buffered_minutes
    }

    #[must_use]
    pub fn whole_minutes(&self) -> u32 {
        whole_minutes(self.accumulated_seconds)
    }

    /// Whole minutes not yet delivered nor buffered.
    #[must_use]
    pub fn unclaimed_minutes(&self) -> u32 {
        self.whole_minutes()
            .saturating_sub(self.flushed_minutes)
            .saturating_sub(self.buffered_minutes)
    }

    #[must_use]
    pub fn monitor(&self) -> &ActivityMonitor {
        &self.monitor
    }

    pub fn record_activity(&mut self, kind: ActivityKind, at: DateTime<Utc>) -> bool {
        self.monitor.record(kind, at)
    }

    pub fn set_visibility(&mut self, visibility: Visibility) -> bool {
        self.monitor.set_visibility(visibility)
    }

    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.monitor.is_active(now)
    }

    /// Advance the accumulator by one second if the user is active at `now`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Tick {
        let counted = self.monitor.is_active(now);
        if counted {
            self.accumulated_seconds = self.accumulated_seconds.saturating_add(1);
        }
        Tick {
            counted,
            seconds: self.accumulated_seconds,
            minute_boundary: counted && self.accumulated_seconds % SECONDS_PER_MINUTE == 0,
        }
    }

    /// Reserve the unclaimed whole minutes for a delivery attempt.
    ///
    /// Callers must serialize claims: at most one may be outstanding.
    #[must_use]
    pub fn claim_flush(&self) -> Option<FlushClaim> {
        let minutes = self.unclaimed_minutes();
        (minutes > 0).then_some(FlushClaim {
            date: self.date,
            minutes,
        })
    }

    /// Mark a claim as delivered. Stale claims from before a rollover are ignored.
    pub fn confirm_flush(&mut self, claim: &FlushClaim) -> bool {
        if claim.date != self.date {
            return false;
        }
        self.flushed_minutes = self.flushed_minutes.saturating_add(claim.minutes);
        true
    }

    /// Hand a claim that was not delivered over to a durable local bucket.
    pub fn buffer_flush(&mut self, claim: &FlushClaim) -> bool {
        if claim.date != self.date {
            return false;
        }
        self.buffered_minutes = self.buffered_minutes.saturating_add(claim.minutes);
        true
    }

    /// A later path delivered `minutes`; move up to that many from the
    /// buffered bucket to the delivered one. Returns the amount moved.
    pub fn settle_retried(&mut self, minutes: u32) -> u32 {
        let moved = minutes.min(self.buffered_minutes);
        self.buffered_minutes -= moved;
        self.flushed_minutes = self.flushed_minutes.saturating_add(moved);
        moved
    }

    /// Start a fresh day. Returns the date the old counters belonged to.
    pub fn roll_over(&mut self, date: CalendarDate) -> CalendarDate {
        let previous = self.date;
        self.date = date;
        self.accumulated_seconds = 0;
        self.flushed_minutes = 0;
        self.buffered_minutes = 0;
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn idle_threshold() -> Duration {
        Duration::minutes(5)
    }

    fn today() -> CalendarDate {
        CalendarDate::from_ymd(2023, 11, 15).unwrap()
    }

    fn run_active(clock: &mut SessionClock, start: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
        let mut now = start;
        for _ in 0..seconds {
            now += Duration::seconds(1);
            clock.record_activity(ActivityKind::PointerMove, now);
            clock.tick(now);
        }
        now
    }

    #[test]
    fn first_tick_after_mount_is_active() {
        let mut clock = SessionClock::new(today(), fixed_now(), idle_threshold());
        let tick = clock.tick(fixed_now() + Duration::seconds(1));
        assert!(tick.counted);
        assert_eq!(tick.seconds, 1);
    }

    #[test]
    fn counts_one_per_active_second_and_none_while_hidden() {
        let start = fixed_now();
        let mut clock = SessionClock::new(today(), start, idle_threshold());
        let now = run_active(&mut clock, start, 30);
        assert_eq!(clock.accumulated_seconds(), 30);

        clock.set_visibility(Visibility::Hidden);
        let mut later = now;
        for _ in 0..20 {
            later += Duration::seconds(1);
            clock.record_activity(ActivityKind::Scroll, later);
            assert!(!clock.tick(later).counted);
        }
        assert_eq!(clock.accumulated_seconds(), 30);

        clock.set_visibility(Visibility::Visible);
        run_active(&mut clock, later, 5);
        assert_eq!(clock.accumulated_seconds(), 35);
    }

    #[test]
    fn idle_user_stops_accumulating_at_threshold() {
        let start = fixed_now();
        let mut clock = SessionClock::new(today(), start, idle_threshold());
        let mut seconds = Vec::new();
        for s in 1..=400 {
            let tick = clock.tick(start + Duration::seconds(s));
            seconds.push(tick.seconds);
        }
        // Ticks count while less than five minutes have passed since mount.
        assert_eq!(clock.accumulated_seconds(), 299);
        assert!(seconds.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seconds[299], seconds[399]);
    }

    #[test]
    fn activity_after_idle_resumes_counting() {
        let start = fixed_now();
        let mut clock = SessionClock::new(today(), start, idle_threshold());
        let late = start + Duration::minutes(10);
        assert!(clock.record_activity(ActivityKind::KeyPress, late));
        assert!(clock.tick(late + Duration::seconds(1)).counted);
        assert!(!clock.record_activity(ActivityKind::Click, late + Duration::seconds(2)));
    }

    #[test]
    fn minute_boundary_flag_follows_counted_seconds() {
        let start = fixed_now();
        let mut clock = SessionClock::new(today(), start, idle_threshold());
        let mut boundaries = 0;
        let mut now = start;
        for _ in 0..125 {
            now += Duration::seconds(1);
            clock.record_activity(ActivityKind::PointerMove, now);
            if clock.tick(now).minute_boundary {
                boundaries += 1;
            }
        }
        assert_eq!(boundaries, 2);
        assert_eq!(clock.accumulated_seconds(), 125);
    }

    #[test]
    fn continuous_activity_flushes_two_minutes_once() {
        let start = fixed_now();
        let mut clock = SessionClock::new(today(), start, idle_threshold());
        run_active(&mut clock, start, 125);

        let claim = clock.claim_flush().expect("two whole minutes");
        assert_eq!(claim.minutes, 2);
        assert!(clock.confirm_flush(&claim));

        assert_eq!(clock.claim_flush(), None);
        assert_eq!(clock.accumulated_seconds(), 125);
        assert_eq!(clock.flushed_minutes(), 2);
    }

    #[test]
    fn buffered_minutes_are_not_reclaimed_by_boundary_path() {
        let start = fixed_now();
        let mut clock = SessionClock::new(today(), start, idle_threshold());
        let now = run_active(&mut clock, start, 180);

        let claim = clock.claim_flush().unwrap();
        assert_eq!(claim.minutes, 3);
        assert!(clock.buffer_flush(&claim));
        assert_eq!(clock.flushed_minutes(), 0);
        assert_eq!(clock.buffered_minutes(), 3);
        assert_eq!(clock.claim_flush(), None);

        run_active(&mut clock, now, 60);
        assert_eq!(clock.claim_flush().map(|c| c.minutes), Some(1));

        assert_eq!(clock.settle_retried(3), 3);
        assert_eq!(clock.buffered_minutes(), 0);
        assert_eq!(clock.flushed_minutes(), 3);
    }

    #[test]
    fn settle_never_moves_more_than_buffered() {
        let start = fixed_now();
        let mut clock = SessionClock::new(today(), start, idle_threshold());
        run_active(&mut clock, start, 60);
        let claim = clock.claim_flush().unwrap();
        clock.buffer_flush(&claim);

        // the durable buffer may also hold minutes from an earlier reload
        assert_eq!(clock.settle_retried(4), 1);
        assert_eq!(clock.flushed_minutes(), 1);
    }

    #[test]
    fn stale_claims_are_ignored_after_rollover() {
        let start = fixed_now();
        let mut clock = SessionClock::new(today(), start, idle_threshold());
        run_active(&mut clock, start, 61);
        let claim = clock.claim_flush().unwrap();

        let tomorrow = today().add_days(1).unwrap();
        assert_eq!(clock.roll_over(tomorrow), today());
        assert!(!clock.confirm_flush(&claim));
        assert!(!clock.buffer_flush(&claim));
        assert_eq!(clock.accumulated_seconds(), 0);
        assert_eq!(clock.flushed_minutes(), 0);
    }

    #[test]
    fn overlapping_triggers_deliver_each_minute_once() {
        // Deterministic mix of ticks, boundary flushes, safety-net flushes,
        // failures and retries.
        let start = fixed_now();
        let mut clock = SessionClock::new(today(), start, idle_threshold());
        let mut delivered = 0_u32;
        let mut buffer = 0_u32;
        let mut state = 0x2545_f491_u32;
        let mut now = start;

        for step in 0..5_000 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;

            now += Duration::seconds(1);
            if state % 7 != 0 {
                clock.record_activity(ActivityKind::KeyPress, now);
            }
            let tick = clock.tick(now);

            let boundary = tick.minute_boundary;
            let safety_net = step % 120 == 0;
            for _ in 0..u8::from(boundary) + u8::from(safety_net) {
                if let Some(claim) = clock.claim_flush() {
                    if state % 5 == 0 {
                        clock.buffer_flush(&claim);
                        buffer += claim.minutes;
                    } else {
                        clock.confirm_flush(&claim);
                        delivered += claim.minutes;
                    }
                }
            }

            if step % 300 == 0 && buffer > 0 {
                delivered += buffer;
                clock.settle_retried(buffer);
                buffer = 0;
            }
        }

        if let Some(claim) = clock.claim_flush() {
            clock.confirm_flush(&claim);
            delivered += claim.minutes;
        }
        delivered += buffer;
        clock.settle_retried(buffer);

        assert_eq!(delivered, clock.whole_minutes());
        assert_eq!(clock.flushed_minutes(), clock.whole_minutes());
    }

    #[test]
    fn parses_dom_event_names() {
        assert_eq!("mousemove".parse(), Ok(ActivityKind::PointerMove));
        assert_eq!("touchstart".parse(), Ok(ActivityKind::TouchStart));
        assert!("wheel".parse::<ActivityKind>().is_err());
    }

    #[test]
    fn unknown_event_error_names_the_event() {
        let err = " wheel ".parse::<ActivityKind>().unwrap_err();
        assert_eq!(err, UnknownActivityError("wheel".to_string()));
        assert_eq!(err.to_string(), "unknown activity event: wheel");

        let wrapped: crate::Error = err.into();
        assert_eq!(wrapped.to_string(), "unknown activity event: wheel");
    }
}
