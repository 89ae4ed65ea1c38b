use chrono::Weekday;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::model::date::{CalendarDate, CalendarDateError};
use crate::model::minutes::{MINUTES_PER_DAY, clamp_day_minutes};

pub const DAYS_PER_WEEK: usize = 7;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WeekError {
    #[error("week must start on a Sunday, got {0}")]
    NotSunday(CalendarDate),

    #[error(transparent)]
    Date(#[from] CalendarDateError),
}

//
// ─── WEEK START ────────────────────────────────────────────────────────────────
//

/// A Sunday-to-Saturday window, identified by its Sunday.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeekStart {
    start: CalendarDate,
    end: CalendarDate,
}

impl WeekStart {
    /// # Errors
    ///
    /// Returns `WeekError::NotSunday` unless `start` is a Sunday, or
    /// `WeekError::Date` if the Saturday is out of range.
    pub fn new(start: CalendarDate) -> Result<Self, WeekError> {
        if start.weekday() != Weekday::Sun {
            return Err(WeekError::NotSunday(start));
        }
        let end = start.add_days(6)?;
        Ok(Self { start, end })
    }

    /// The week that contains `date`.
    ///
    /// # Errors
    ///
    /// Returns `WeekError::Date` at the edges of the supported calendar.
    pub fn containing(date: CalendarDate) -> Result<Self, WeekError> {
        let offset = i64::from(date.weekday().num_days_from_sunday());
        Self::new(date.add_days(-offset)?)
    }

    #[must_use]
    pub fn start(&self) -> CalendarDate {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> CalendarDate {
        self.end
    }

    #[must_use]
    pub fn contains(&self, date: CalendarDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// The seven dates of the week, Sunday first.
    pub fn days(&self) -> impl Iterator<Item = CalendarDate> + use<> {
        self.start
            .naive()
            .iter_days()
            .take(DAYS_PER_WEEK)
            .map(CalendarDate::from_naive)
    }

    /// # Errors
    ///
    /// Returns `WeekError::Date` at the edges of the supported calendar.
    pub fn previous(&self) -> Result<Self, WeekError> {
        Self::new(self.start.add_days(-7)?)
    }

    /// # Errors
    ///
    /// Returns `WeekError::Date` at the edges of the supported calendar.
    pub fn next(&self) -> Result<Self, WeekError> {
        Self::new(self.start.add_days(7)?)
    }

    /// `May 5 - 11, 2024` within a month, `Apr 28 - May 4, 2024` across months.
    #[must_use]
    pub fn range_label(&self) -> String {
        let (start, end) = (self.start, self.end);
        if start.year() == end.year() && start.month_label() == end.month_label() {
            format!(
                "{} {} - {}, {}",
                start.month_label(),
                start.day(),
                end.day(),
                end.year()
            )
        } else {
            format!(
                "{} {} - {} {}, {}",
                start.month_label(),
                start.day(),
                end.month_label(),
                end.day(),
                end.year()
            )
        }
    }
}

impl fmt::Debug for WeekStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeekStart({}..={})", self.start, self.end)
    }
}

impl fmt::Display for WeekStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start)
    }
}

//
// ─── WEEK VIEW ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayEntry {
    pub date: CalendarDate,
    pub label: &'static str,
    pub minutes: u32,
    pub is_today: bool,
    pub is_past: bool,
    pub is_future: bool,
}

/// Minute sources for one week, before merging.
///
/// `local` is the cache mirror, `remote` the durable store's report and
/// `live_minutes` the whole minutes the running tracker has counted today.
#[derive(Debug, Clone, Default)]
pub struct WeekSources {
    pub local: HashMap<CalendarDate, u32>,
    pub remote: HashMap<CalendarDate, u32>,
    pub live_minutes: u32,
}

/// Display-ready seven-day window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekView {
    #[serde(skip)]
    week: WeekStart,
    today: CalendarDate,
    days: Vec<DayEntry>,
}

impl WeekView {
    /// Merge the sources day by day.
    ///
    /// Every day shows `max(local, remote)`; today additionally takes the
    /// live minute count into the maximum. All values are clamped to a day.
    #[must_use]
    pub fn build(week: WeekStart, today: CalendarDate, sources: &WeekSources) -> Self {
        let days = week
            .days()
            .map(|date| {
                let local = sources.local.get(&date).copied().unwrap_or(0);
                let remote = sources.remote.get(&date).copied().unwrap_or(0);
                let mut minutes = local.max(remote);
                if date == today {
                    minutes = minutes.max(sources.live_minutes);
                }
                DayEntry {
                    date,
                    label: date.short_label(),
                    minutes: clamp_day_minutes(i64::from(minutes)),
                    is_today: date == today,
                    is_past: date < today,
                    is_future: date > today,
                }
            })
            .collect();
        Self { week, today, days }
    }

    #[must_use]
    pub fn week(&self) -> WeekStart {
        self.week
    }

    #[must_use]
    pub fn today(&self) -> CalendarDate {
        self.today
    }

    #[must_use]
    pub fn days(&self) -> &[DayEntry] {
        &self.days
    }

    #[must_use]
    pub fn day(&self, date: CalendarDate) -> Option<&DayEntry> {
        self.days.iter().find(|entry| entry.date == date)
    }

    #[must_use]
    pub fn is_current(&self) -> bool {
        self.week.contains(self.today)
    }

    #[must_use]
    pub fn total_minutes(&self) -> u32 {
        self.days.iter().map(|entry| entry.minutes).sum()
    }

    /// Days with any practice at all.
    #[must_use]
    pub fn practiced_days(&self) -> usize {
        self.days.iter().filter(|entry| entry.minutes > 0).count()
    }

    #[must_use]
    pub fn range_label(&self) -> String {
        self.week.range_label()
    }

    /// Headline shown above the week card.
    #[must_use]
    pub fn encouragement(&self) -> &'static str {
        if !self.is_current() {
            return "Great Effort!";
        }
        match self.practiced_days() {
            DAYS_PER_WEEK => "Perfect week!",
            n if n >= 5 => "Great consistency!",
            _ => "Keep going!",
        }
    }

    /// Upper bound of `total_minutes`.
    #[must_use]
    pub fn max_minutes() -> u32 {
        MINUTES_PER_DAY * DAYS_PER_WEEK as u32
    }
}

//
// ─── NAVIGATION ────────────────────────────────────────────────────────────────
//

/// Which week the viewer is looking at, bounded by today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekNavigator {
    week: WeekStart,
    today: CalendarDate,
}

impl WeekNavigator {
    /// Start on the week containing `today`.
    ///
    /// # Errors
    ///
    /// Returns `WeekError::Date` at the edges of the supported calendar.
    pub fn new(today: CalendarDate) -> Result<Self, WeekError> {
        Ok(Self {
            week: WeekStart::containing(today)?,
            today,
        })
    }

    #[must_use]
    pub fn week(&self) -> WeekStart {
        self.week
    }

    #[must_use]
    pub fn today(&self) -> CalendarDate {
        self.today
    }

    #[must_use]
    pub fn is_current_week(&self) -> bool {
        self.week.contains(self.today)
    }

    /// True when the following week ends on or before today.
    #[must_use]
    pub fn can_go_next(&self) -> bool {
        self.week
            .next()
            .is_ok_and(|next| next.end() <= self.today)
    }

    /// Step back seven days. Always permitted.
    ///
    /// # Errors
    ///
    /// Returns `WeekError::Date` at the edges of the supported calendar.
    pub fn previous(&mut self) -> Result<WeekStart, WeekError> {
        self.week = self.week.previous()?;
        Ok(self.week)
    }

    /// Step forward seven days. Returns false and leaves the view unchanged
    /// when the next week would end after today.
    pub fn next(&mut self) -> bool {
        match self.week.next() {
            Ok(next) if next.end() <= self.today => {
                self.week = next;
                true
            }
            _ => false,
        }
    }

    /// Jump back to the week containing today.
    ///
    /// # Errors
    ///
    /// Returns `WeekError::Date` at the edges of the supported calendar.
    pub fn current_week(&mut self) -> Result<WeekStart, WeekError> {
        self.week = WeekStart::containing(self.today)?;
        Ok(self.week)
    }

    /// Move today forward, e.g. at midnight. A viewer on the current week
    /// follows today into the new week.
    ///
    /// # Errors
    ///
    /// Returns `WeekError::Date` at the edges of the supported calendar.
    pub fn set_today(&mut self, today: CalendarDate) -> Result<(), WeekError> {
        let following = self.is_current_week();
        self.today = today;
        if following {
            self.week = WeekStart::containing(today)?;
        }
        Ok(())
    }
}
