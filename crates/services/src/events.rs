use practice_core::model::{CalendarDate, WeekView};

/// Notifications published by a running tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// A second was counted; carries the accumulator value.
    Tick { seconds: u64 },
    Flushed {
        date: CalendarDate,
        minutes: u32,
        total: u32,
    },
    /// Delivery failed and the minutes moved to the retry buffer.
    FlushBuffered { date: CalendarDate, minutes: u32 },
    /// No usable credential; the minutes wait for the next sign-in.
    KeptLocal { date: CalendarDate, minutes: u32 },
    Retried {
        date: CalendarDate,
        minutes: u32,
        total: u32,
    },
    WeekRefreshed(WeekView),
    DayRolledOver {
        previous: CalendarDate,
        current: CalendarDate,
    },
}
