#![forbid(unsafe_code)]

pub mod aggregator;
pub mod app_services;
pub mod backend;
pub mod credentials;
pub mod error;
pub mod events;
pub mod flusher;
pub mod local_cache;
pub mod progress;
pub mod tracker;

pub use practice_core::Clock;

pub use aggregator::WeekAggregator;
pub use app_services::AppServices;
pub use backend::{
    BackendConfig, HttpMinuteBackend, MinuteBackend, ProgressBackend, RepositoryBackend,
};
pub use credentials::Credential;
pub use error::{
    AppServicesError, BackendConfigError, BackendError, ProgressServiceError, TrackerError,
};
pub use events::TrackerEvent;
pub use flusher::{FlushOutcome, MinuteFlusher, RetryOutcome};
pub use local_cache::LocalCache;
pub use progress::{ProgressReport, ProgressService, RecordOutcome};
pub use tracker::{SessionTracker, TrackerSnapshot};
