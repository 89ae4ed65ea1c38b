mod date;
mod ids;
mod minutes;
mod progress;
mod session_clock;
mod settings;
mod week;
mod zone;

pub use date::{CalendarDate, CalendarDateError};
pub use ids::{ParseIdError, TrackerSessionId, UserId};
pub use minutes::{
    DailyMinuteRecord, MINUTES_PER_DAY, SECONDS_PER_MINUTE, clamp_day_minutes, format_duration,
    format_minutes, format_session, whole_minutes,
};
pub use progress::{
    DEFAULT_MODULE, LESSON_COMPLETE, LESSON_MODULE, LessonProgress, MAX_ENTRY_MINUTES, ModuleName,
    ModuleTally, ProgressEntry, ProgressError, ProgressSummary,
};
pub use session_clock::{
    ActivityKind, ActivityMonitor, FlushClaim, SessionClock, Tick, UnknownActivityError,
    Visibility,
};
pub use settings::{TrackerSettings, TrackerSettingsDraft, TrackerSettingsError};
pub use week::{DAYS_PER_WEEK, DayEntry, WeekError, WeekNavigator, WeekSources, WeekStart, WeekView};
pub use zone::{DEFAULT_REFERENCE_ZONE, ReferenceZone, UnknownZoneError};
