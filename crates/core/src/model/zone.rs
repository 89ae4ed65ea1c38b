use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::date::CalendarDate;

/// Name of the zone every user's "day" is aligned to.
pub const DEFAULT_REFERENCE_ZONE: &str = "Asia/Karachi";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown time zone: {0}")]
pub struct UnknownZoneError(pub String);

/// The single fixed time zone used for calendar-day boundaries.
///
/// All users share one canonical "today" regardless of the local zone of the
/// machine the tracker runs on.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ReferenceZone(Tz);

impl ReferenceZone {
    #[must_use]
    pub fn new(tz: Tz) -> Self {
        Self(tz)
    }

    #[must_use]
    pub fn tz(&self) -> Tz {
        self.0
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Calendar date of `instant` in the reference zone.
    #[must_use]
    pub fn date_of(&self, instant: DateTime<Utc>) -> CalendarDate {
        CalendarDate::from_naive(instant.with_timezone(&self.0).date_naive())
    }

    /// Canonical "today" for the given instant.
    #[must_use]
    pub fn today(&self, now: DateTime<Utc>) -> CalendarDate {
        self.date_of(now)
    }

    /// The first instant of the day after `now`'s reference-zone date.
    #[must_use]
    pub fn next_midnight(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let fallback = now + Duration::days(1);
        let Ok(tomorrow) = self.today(now).add_days(1) else {
            return fallback;
        };
        let local_midnight = tomorrow.naive().and_time(NaiveTime::MIN);
        self.0
            .from_local_datetime(&local_midnight)
            .earliest()
            .or_else(|| {
                // midnight skipped by a DST jump
                self.0
                    .from_local_datetime(&(local_midnight + Duration::hours(1)))
                    .earliest()
            })
            .map_or(fallback, |dt| dt.with_timezone(&Utc))
    }
}

impl Default for ReferenceZone {
    fn default() -> Self {
        Self(chrono_tz::Asia::Karachi)
    }
}

impl fmt::Debug for ReferenceZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReferenceZone({})", self.name())
    }
}

impl fmt::Display for ReferenceZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReferenceZone {
    type Err = UnknownZoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<Tz>()
            .map(Self)
            .map_err(|_| UnknownZoneError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn today_uses_reference_zone_not_utc() {
        let zone = ReferenceZone::default();
        // 22:13 UTC on the 14th is already 03:13 on the 15th in Karachi.
        assert_eq!(zone.today(fixed_now()).to_string(), "2023-11-15");
        let utc: ReferenceZone = "UTC".parse().unwrap();
        assert_eq!(utc.today(fixed_now()).to_string(), "2023-11-14");
    }

    #[test]
    fn next_midnight_is_start_of_following_local_day() {
        let zone = ReferenceZone::default();
        let midnight = zone.next_midnight(fixed_now());
        // 2023-11-16T00:00+05:00
        assert_eq!(midnight.to_rfc3339(), "2023-11-15T19:00:00+00:00");
        assert_eq!(zone.today(midnight).to_string(), "2023-11-16");
        assert_eq!(
            zone.today(midnight - Duration::seconds(1)).to_string(),
            "2023-11-15"
        );
    }

    #[test]
    fn parses_iana_names() {
        let zone: ReferenceZone = "Europe/Berlin".parse().unwrap();
        assert_eq!(zone.name(), "Europe/Berlin");
        assert!("Mars/Olympus".parse::<ReferenceZone>().is_err());
    }
}
