//! Shared error types for the services crate.

use thiserror::Error;

use practice_core::model::{ProgressError, WeekError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors raised while reading the remote backend configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendConfigError {
    #[error("invalid API base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("API base URL must be http or https, got {0}")]
    UnsupportedScheme(String),
    #[error("invalid request timeout: {0}")]
    InvalidTimeout(String),
}

/// Errors emitted by a `MinuteBackend`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    #[error("not authenticated")]
    Unauthenticated,
    #[error("minute backend request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

/// Errors emitted by `SessionTracker` and its collaborators.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrackerError {
    #[error("tracker is already running")]
    AlreadyRunning,
    #[error("tracker is not running")]
    NotRunning,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Week(#[from] WeekError),
}

/// Errors emitted by `ProgressService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressServiceError {
    #[error(transparent)]
    Invalid(#[from] ProgressError),
    #[error("lesson progress needs a signed-in account")]
    NotSignedIn,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Config(#[from] BackendConfigError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
