use serde::{Deserialize, Serialize};

use crate::model::date::CalendarDate;

/// One day's worth of minutes; every displayed total is clamped to this.
pub const MINUTES_PER_DAY: u32 = 1440;

pub const SECONDS_PER_MINUTE: u64 = 60;

/// Clamp a raw (possibly negative or oversized) minute count to `[0, 1440]`.
#[must_use]
pub fn clamp_day_minutes(raw: i64) -> u32 {
    let bounded = raw.clamp(0, i64::from(MINUTES_PER_DAY));
    u32::try_from(bounded).unwrap_or(MINUTES_PER_DAY)
}

/// Whole minutes contained in `seconds`; the remainder is dropped.
#[must_use]
pub fn whole_minutes(seconds: u64) -> u32 {
    u32::try_from(seconds / SECONDS_PER_MINUTE).unwrap_or(u32::MAX)
}

/// Durable per-user, per-date total of practiced minutes.
///
/// The stored value only grows through additive increments; readers see it
/// through [`DailyMinuteRecord::minutes`], which is always clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyMinuteRecord {
    date: CalendarDate,
    minutes: u32,
}

impl DailyMinuteRecord {
    #[must_use]
    pub fn new(date: CalendarDate, raw_minutes: i64) -> Self {
        Self {
            date,
            minutes: clamp_day_minutes(raw_minutes),
        }
    }

    #[must_use]
    pub fn date(&self) -> CalendarDate {
        self.date
    }

    #[must_use]
    pub fn minutes(&self) -> u32 {
        self.minutes
    }
}

/// Render a day's total the way the weekly card shows it: `45m`, `2h`, `1h 05m`.
#[must_use]
pub fn format_minutes(minutes: u32) -> String {
    format_duration(minutes.min(MINUTES_PER_DAY))
}

/// Same rendering without the one-day cap, for week totals.
#[must_use]
pub fn format_duration(minutes: u32) -> String {
    if minutes < 60 {
        return format!("{minutes}m");
    }
    let hours = minutes / 60;
    let rest = minutes % 60;
    if rest == 0 {
        format!("{hours}h")
    } else {
        format!("{hours}h {rest:02}m")
    }
}

/// Render the live session counter: `1 second`, `42 seconds`, `3 min 7 sec`.
#[must_use]
pub fn format_session(seconds: u64) -> String {
    let minutes = seconds / SECONDS_PER_MINUTE;
    let rest = seconds % SECONDS_PER_MINUTE;
    if minutes == 0 {
        let plural = if rest == 1 { "" } else { "s" };
        format!("{rest} second{plural}")
    } else {
        format!("{minutes} min {rest} sec")
    }
}
