use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CalendarDateError {
    #[error("invalid calendar date: {0}")]
    Invalid(String),

    #[error("date arithmetic out of range")]
    OutOfRange,
}

/// A calendar day in the reference zone, rendered as `YYYY-MM-DD`.
///
/// This is the key of every daily minute record and of the local cache.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CalendarDate(NaiveDate);

impl CalendarDate {
    /// Build a date from its components.
    ///
    /// # Errors
    ///
    /// Returns `CalendarDateError::Invalid` if the components do not name a real day.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Result<Self, CalendarDateError> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| CalendarDateError::Invalid(format!("{year:04}-{month:02}-{day:02}")))
    }

    #[must_use]
    pub fn from_naive(date: NaiveDate) -> Self {
        Self(date)
    }

    #[must_use]
    pub fn naive(&self) -> NaiveDate {
        self.0
    }

    #[must_use]
    pub fn weekday(&self) -> Weekday {
        self.0.weekday()
    }

    #[must_use]
    pub fn year(&self) -> i32 {
        self.0.year()
    }

    #[must_use]
    pub fn day(&self) -> u32 {
        self.0.day()
    }

    /// Three-letter English weekday label (`Sun` .. `Sat`).
    #[must_use]
    pub fn short_label(&self) -> &'static str {
        match self.weekday() {
            Weekday::Sun => "Sun",
            Weekday::Mon => "Mon",
            Weekday::Tue => "Tue",
            Weekday::Wed => "Wed",
            Weekday::Thu => "Thu",
            Weekday::Fri => "Fri",
            Weekday::Sat => "Sat",
        }
    }

    /// Three-letter English month label (`Jan` .. `Dec`).
    #[must_use]
    pub fn month_label(&self) -> String {
        self.0.format("%b").to_string()
    }

    /// Shift by a signed number of days.
    ///
    /// # Errors
    ///
    /// Returns `CalendarDateError::OutOfRange` past chrono's supported range.
    pub fn add_days(&self, days: i64) -> Result<Self, CalendarDateError> {
        let magnitude = Days::new(days.unsigned_abs());
        let shifted = if days >= 0 {
            self.0.checked_add_days(magnitude)
        } else {
            self.0.checked_sub_days(magnitude)
        };
        shifted.map(Self).ok_or(CalendarDateError::OutOfRange)
    }
}

impl fmt::Debug for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CalendarDate({self})")
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for CalendarDate {
    type Err = CalendarDateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|_| CalendarDateError::Invalid(s.to_string()))
    }
}

impl TryFrom<String> for CalendarDate {
    type Error = CalendarDateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CalendarDate> for String {
    fn from(date: CalendarDate) -> Self {
        date.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_iso_dates() {
        let date: CalendarDate = "2024-05-01".parse().unwrap();
        assert_eq!(date.to_string(), "2024-05-01");
        assert_eq!(date.short_label(), "Wed");
        assert_eq!(date.month_label(), "May");
    }

    #[test]
    fn rejects_invalid_dates() {
        assert!("2024-02-30".parse::<CalendarDate>().is_err());
        assert!("05/01/2024".parse::<CalendarDate>().is_err());
        assert!(CalendarDate::from_ymd(2023, 13, 1).is_err());
    }

    #[test]
    fn add_days_crosses_month_boundaries() {
        let date = CalendarDate::from_ymd(2024, 4, 28).unwrap();
        assert_eq!(date.add_days(6).unwrap().to_string(), "2024-05-04");
        assert_eq!(date.add_days(-7).unwrap().to_string(), "2024-04-21");
    }

    #[test]
    fn converts_to_and_from_strings() {
        let date = CalendarDate::try_from("2024-05-01".to_string()).unwrap();
        assert_eq!(String::from(date), "2024-05-01");
    }
}
