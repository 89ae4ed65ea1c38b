use thiserror::Error;

use crate::model::{
    CalendarDateError, ParseIdError, ProgressError, TrackerSettingsError, UnknownActivityError,
    UnknownZoneError, WeekError,
};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Date(#[from] CalendarDateError),
    #[error(transparent)]
    Week(#[from] WeekError),
    #[error(transparent)]
    Settings(#[from] TrackerSettingsError),
    #[error(transparent)]
    Zone(#[from] UnknownZoneError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
    #[error(transparent)]
    Activity(#[from] UnknownActivityError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
}
