use chrono::Duration;
use thiserror::Error;

use crate::model::zone::{ReferenceZone, UnknownZoneError};

pub const DEFAULT_IDLE_THRESHOLD_SECS: i64 = 5 * 60;
pub const DEFAULT_TICK_INTERVAL_SECS: i64 = 1;
pub const DEFAULT_FLUSH_INTERVAL_SECS: i64 = 2 * 60;
pub const DEFAULT_REFRESH_INTERVAL_SECS: i64 = 5 * 60;

/// Timing and zone parameters of a tracker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackerSettings {
    idle_threshold: Duration,
    tick_interval: Duration,
    flush_interval: Duration,
    refresh_interval: Duration,
    reference_zone: ReferenceZone,
}

/// Unvalidated settings; `None` keeps the default.
#[derive(Clone, Debug, Default)]
pub struct TrackerSettingsDraft {
    pub idle_threshold_secs: Option<i64>,
    pub tick_interval_secs: Option<i64>,
    pub flush_interval_secs: Option<i64>,
    pub refresh_interval_secs: Option<i64>,
    pub reference_zone: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TrackerSettingsError {
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: i64 },

    #[error("flush interval ({flush}s) must not be shorter than the tick interval ({tick}s)")]
    FlushShorterThanTick { flush: i64, tick: i64 },

    #[error(transparent)]
    Zone(#[from] UnknownZoneError),
}

impl TrackerSettingsDraft {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and normalize the draft.
    ///
    /// # Errors
    ///
    /// Returns `TrackerSettingsError` if an interval is not positive, the
    /// safety-net flush would run more often than the tick, or the zone name
    /// is unknown.
    pub fn validate(self) -> Result<TrackerSettings, TrackerSettingsError> {
        let idle = positive(
            "idle threshold",
            self.idle_threshold_secs,
            DEFAULT_IDLE_THRESHOLD_SECS,
        )?;
        let tick = positive(
            "tick interval",
            self.tick_interval_secs,
            DEFAULT_TICK_INTERVAL_SECS,
        )?;
        let flush = positive(
            "flush interval",
            self.flush_interval_secs,
            DEFAULT_FLUSH_INTERVAL_SECS,
        )?;
        let refresh = positive(
            "refresh interval",
            self.refresh_interval_secs,
            DEFAULT_REFRESH_INTERVAL_SECS,
        )?;
        if flush < tick {
            return Err(TrackerSettingsError::FlushShorterThanTick { flush, tick });
        }

        let reference_zone = match self
            .reference_zone
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
        {
            Some(name) => name.parse::<ReferenceZone>()?,
            None => ReferenceZone::default(),
        };

        Ok(TrackerSettings {
            idle_threshold: Duration::seconds(idle),
            tick_interval: Duration::seconds(tick),
            flush_interval: Duration::seconds(flush),
            refresh_interval: Duration::seconds(refresh),
            reference_zone,
        })
    }
}

impl TrackerSettings {
    #[must_use]
    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    #[must_use]
    pub fn reference_zone(&self) -> ReferenceZone {
        self.reference_zone
    }

    #[must_use]
    pub fn with_reference_zone(mut self, zone: ReferenceZone) -> Self {
        self.reference_zone = zone;
        self
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::seconds(DEFAULT_IDLE_THRESHOLD_SECS),
            tick_interval: Duration::seconds(DEFAULT_TICK_INTERVAL_SECS),
            flush_interval: Duration::seconds(DEFAULT_FLUSH_INTERVAL_SECS),
            refresh_interval: Duration::seconds(DEFAULT_REFRESH_INTERVAL_SECS),
            reference_zone: ReferenceZone::default(),
        }
    }
}

fn positive(
    field: &'static str,
    value: Option<i64>,
    default: i64,
) -> Result<i64, TrackerSettingsError> {
    let value = value.unwrap_or(default);
    if value <= 0 {
        return Err(TrackerSettingsError::NonPositive { field, value });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_draft_yields_defaults() {
        let settings = TrackerSettingsDraft::new().validate().unwrap();
        assert_eq!(settings, TrackerSettings::default());
        assert_eq!(settings.idle_threshold(), Duration::minutes(5));
        assert_eq!(settings.flush_interval(), Duration::minutes(2));
        assert_eq!(settings.reference_zone().name(), "Asia/Karachi");
    }

    #[test]
    fn rejects_non_positive_intervals() {
        let draft = TrackerSettingsDraft {
            idle_threshold_secs: Some(0),
            ..TrackerSettingsDraft::default()
        };
        assert!(matches!(
            draft.validate(),
            Err(TrackerSettingsError::NonPositive { field: "idle threshold", value: 0 })
        ));
    }

    #[test]
    fn rejects_flush_faster_than_tick() {
        let draft = TrackerSettingsDraft {
            tick_interval_secs: Some(10),
            flush_interval_secs: Some(5),
            ..TrackerSettingsDraft::default()
        };
        assert_eq!(
            draft.validate(),
            Err(TrackerSettingsError::FlushShorterThanTick { flush: 5, tick: 10 })
        );
    }

    #[test]
    fn parses_zone_and_ignores_blank() {
        let draft = TrackerSettingsDraft {
            reference_zone: Some(" Europe/Berlin ".into()),
            ..TrackerSettingsDraft::default()
        };
        assert_eq!(draft.validate().unwrap().reference_zone().name(), "Europe/Berlin");

        let blank = TrackerSettingsDraft {
            reference_zone: Some("   ".into()),
            ..TrackerSettingsDraft::default()
        };
        assert_eq!(blank.validate().unwrap().reference_zone().name(), "Asia/Karachi");

        let bad = TrackerSettingsDraft {
            reference_zone: Some("Mars/Olympus".into()),
            ..TrackerSettingsDraft::default()
        };
        assert!(matches!(bad.validate(), Err(TrackerSettingsError::Zone(_))));
    }
}
