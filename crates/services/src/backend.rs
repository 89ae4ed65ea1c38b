//! Persistence backend for daily minute totals and progress entries.
//!
//! The tracker talks to one `MinuteBackend` and the progress page to one
//! `ProgressBackend`: either the remote HTTP API or, when no API is
//! configured, the local repositories.

use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use practice_core::model::{
    CalendarDate, DailyMinuteRecord, LessonProgress, ModuleTally, ProgressEntry, ProgressSummary,
    UserId,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use storage::repository::{DailyMinutesRepository, ProgressRepository};
use url::Url;

use crate::credentials::Credential;
use crate::error::{BackendConfigError, BackendError};

pub const API_URL_ENV: &str = "PRACTICE_API_URL";
pub const API_TIMEOUT_ENV: &str = "PRACTICE_API_TIMEOUT_SECS";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Caller-scoped access to durable daily minute totals.
#[async_trait]
pub trait MinuteBackend: Send + Sync {
    /// Add `minutes` to `date` and return the new total for that day.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Unauthenticated` if the credential is rejected,
    /// or a transport/storage error.
    async fn increment_minutes(
        &self,
        credential: &Credential,
        date: CalendarDate,
        minutes: u32,
    ) -> Result<DailyMinuteRecord, BackendError>;

    /// Totals for `start..=end`; days without practice may be omitted.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on authentication, transport or decoding failures.
    async fn minutes_for_range(
        &self,
        credential: &Credential,
        start: CalendarDate,
        end: CalendarDate,
    ) -> Result<Vec<DailyMinuteRecord>, BackendError>;

    /// Total for one day; zero when nothing was recorded.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on authentication, transport or decoding failures.
    async fn minutes_for_date(
        &self,
        credential: &Credential,
        date: CalendarDate,
    ) -> Result<DailyMinuteRecord, BackendError>;
}

/// Caller-scoped access to quiz, practice and lesson results.
#[async_trait]
pub trait ProgressBackend: Send + Sync {
    /// Store one finished exercise or lesson update.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Unauthenticated` if the credential is rejected,
    /// or a transport/storage error.
    async fn record_progress(
        &self,
        credential: &Credential,
        entry: &ProgressEntry,
    ) -> Result<(), BackendError>;

    /// Totals over every entry of the caller, per module.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on authentication, transport or decoding failures.
    async fn progress_summary(
        &self,
        credential: &Credential,
    ) -> Result<ProgressSummary, BackendError>;

    /// Latest progress of each lesson the caller touched.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on authentication, transport or decoding failures.
    async fn lesson_progress(
        &self,
        credential: &Credential,
    ) -> Result<Vec<LessonProgress>, BackendError>;
}

//
// ─── HTTP ──────────────────────────────────────────────────────────────────────
//

#[derive(Clone, Debug)]
pub struct BackendConfig {
    base_url: Url,
    timeout: Duration,
}

impl BackendConfig {
    /// # Errors
    ///
    /// Returns `BackendConfigError` if `base_url` is not an absolute http(s) URL.
    pub fn new(base_url: &str) -> Result<Self, BackendConfigError> {
        let mut base_url = Url::parse(base_url.trim())?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(BackendConfigError::UnsupportedScheme(
                base_url.scheme().to_string(),
            ));
        }
        // Joining relative endpoints keeps any path prefix only with a trailing slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read `PRACTICE_API_URL` and `PRACTICE_API_TIMEOUT_SECS`.
    ///
    /// Returns `Ok(None)` when no API URL is set.
    ///
    /// # Errors
    ///
    /// Returns `BackendConfigError` if a variable is set but malformed.
    pub fn from_env() -> Result<Option<Self>, BackendConfigError> {
        let Some(base_url) = env::var(API_URL_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
        else {
            return Ok(None);
        };
        let mut config = Self::new(&base_url)?;
        if let Ok(raw) = env::var(API_TIMEOUT_ENV) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(BackendConfigError::InvalidTimeout(raw))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Ok(Some(config))
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }
}

#[derive(Clone)]
pub struct HttpMinuteBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpMinuteBackend {
    /// # Errors
    ///
    /// Returns `BackendError::Http` if the HTTP client cannot be built.
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn send<T: DeserializeOwned>(
        request: RequestBuilder,
        credential: &Credential,
    ) -> Result<T, BackendError> {
        let response = request.bearer_auth(credential.as_str()).send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(BackendError::Unauthenticated);
            }
            status if !status.is_success() => return Err(BackendError::HttpStatus(status)),
            _ => {}
        }
        response
            .json::<T>()
            .await
            .map_err(|err| BackendError::InvalidResponse(err.to_string()))
    }
}

#[async_trait]
impl MinuteBackend for HttpMinuteBackend {
    async fn increment_minutes(
        &self,
        credential: &Credential,
        date: CalendarDate,
        minutes: u32,
    ) -> Result<DailyMinuteRecord, BackendError> {
        let url = self.config.endpoint("api/session/flush-minutes")?;
        let request = self.client.post(url).json(&FlushRequest { date, minutes });
        let body: FlushResponse = Self::send(request, credential).await?;
        Ok(DailyMinuteRecord::new(date, body.total_minutes))
    }

    async fn minutes_for_range(
        &self,
        credential: &Credential,
        start: CalendarDate,
        end: CalendarDate,
    ) -> Result<Vec<DailyMinuteRecord>, BackendError> {
        let url = self.config.endpoint("api/session/get-range")?;
        let request = self.client.post(url).json(&RangeRequest {
            start_date: start,
            end_date: end,
        });
        let body: Vec<RangeEntry> = Self::send(request, credential).await?;
        body.into_iter()
            .map(|entry| {
                let date = entry
                    .date
                    .get(..10)
                    .unwrap_or(entry.date.as_str())
                    .parse::<CalendarDate>()
                    .map_err(|err| BackendError::InvalidResponse(err.to_string()))?;
                Ok(DailyMinuteRecord::new(date, entry.minutes))
            })
            .collect()
    }

    async fn minutes_for_date(
        &self,
        credential: &Credential,
        date: CalendarDate,
    ) -> Result<DailyMinuteRecord, BackendError> {
        let url = self
            .config
            .endpoint(&format!("api/session/get-day/{date}"))?;
        let body: DayResponse = Self::send(self.client.get(url), credential).await?;
        Ok(DailyMinuteRecord::new(date, body.minutes))
    }
}

#[async_trait]
impl ProgressBackend for HttpMinuteBackend {
    async fn record_progress(
        &self,
        credential: &Credential,
        entry: &ProgressEntry,
    ) -> Result<(), BackendError> {
        let request = match entry.lesson_id() {
            Some(lesson_id) => {
                let url = self
                    .config
                    .endpoint(&format!("api/lessons/{lesson_id}/progress"))?;
                self.client.post(url).json(&LessonProgressRequest {
                    progress: entry.score(),
                })
            }
            None => {
                let url = self.config.endpoint("api/progress")?;
                self.client.post(url).json(&ProgressRequest {
                    module: entry.module().as_str(),
                    score: entry.score(),
                    total: entry.total(),
                    minutes: entry.minutes(),
                })
            }
        };
        let _: serde::de::IgnoredAny = Self::send(request, credential).await?;
        Ok(())
    }

    async fn progress_summary(
        &self,
        credential: &Credential,
    ) -> Result<ProgressSummary, BackendError> {
        let url = self.config.endpoint("api/progress/me")?;
        let body: SummaryResponse = Self::send(self.client.get(url), credential).await?;
        Ok(ProgressSummary {
            entries: body.total_lessons,
            total_score: body.total_score,
            total_possible: body.total_possible,
            by_module: body
                .by_module
                .into_iter()
                .map(|(module, tally)| {
                    let tally = ModuleTally {
                        score: tally.score,
                        total: tally.total,
                        count: tally.count,
                    };
                    (module, tally)
                })
                .collect(),
        })
    }

    async fn lesson_progress(
        &self,
        credential: &Credential,
    ) -> Result<Vec<LessonProgress>, BackendError> {
        let url = self.config.endpoint("api/lessons/progress/me")?;
        let body: Vec<LessonEntry> = Self::send(self.client.get(url), credential).await?;
        Ok(body
            .into_iter()
            .map(|lesson| LessonProgress::new(lesson.id, lesson.progress))
            .collect())
    }
}

#[derive(Debug, Serialize)]
struct FlushRequest {
    date: CalendarDate,
    minutes: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlushResponse {
    total_minutes: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RangeRequest {
    start_date: CalendarDate,
    end_date: CalendarDate,
}

#[derive(Debug, Deserialize)]
struct RangeEntry {
    date: String,
    #[serde(default)]
    minutes: i64,
}

#[derive(Debug, Deserialize)]
struct DayResponse {
    #[serde(default)]
    minutes: i64,
}

#[derive(Debug, Serialize)]
struct ProgressRequest<'a> {
    module: &'a str,
    score: u32,
    total: u32,
    minutes: u32,
}

#[derive(Debug, Serialize)]
struct LessonProgressRequest {
    progress: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResponse {
    #[serde(default)]
    total_lessons: u32,
    #[serde(default)]
    total_score: u64,
    #[serde(default)]
    total_possible: u64,
    #[serde(default)]
    by_module: BTreeMap<String, TallyEntry>,
}

#[derive(Debug, Deserialize)]
struct TallyEntry {
    #[serde(default)]
    score: u64,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    count: u32,
}

#[derive(Debug, Deserialize)]
struct LessonEntry {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    progress: u32,
}

//
// ─── LOCAL REPOSITORY ──────────────────────────────────────────────────────────
//

/// Backend over the local `DailyMinutesRepository` and `ProgressRepository`.
///
/// The credential is the user id, so a signed-out tracker behaves exactly as
/// it does against the remote API.
#[derive(Clone)]
pub struct RepositoryBackend {
    repo: Arc<dyn DailyMinutesRepository>,
    progress: Arc<dyn ProgressRepository>,
}

impl RepositoryBackend {
    #[must_use]
    pub fn new(
        repo: Arc<dyn DailyMinutesRepository>,
        progress: Arc<dyn ProgressRepository>,
    ) -> Self {
        Self { repo, progress }
    }

    fn user(credential: &Credential) -> Result<UserId, BackendError> {
        UserId::new(credential.as_str()).map_err(|_| BackendError::Unauthenticated)
    }
}

#[async_trait]
impl MinuteBackend for RepositoryBackend {
    async fn increment_minutes(
        &self,
        credential: &Credential,
        date: CalendarDate,
        minutes: u32,
    ) -> Result<DailyMinuteRecord, BackendError> {
        let user = Self::user(credential)?;
        Ok(self.repo.increment_minutes(&user, date, minutes).await?)
    }

    async fn minutes_for_range(
        &self,
        credential: &Credential,
        start: CalendarDate,
        end: CalendarDate,
    ) -> Result<Vec<DailyMinuteRecord>, BackendError> {
        let user = Self::user(credential)?;
        Ok(self.repo.minutes_for_range(&user, start, end).await?)
    }

    async fn minutes_for_date(
        &self,
        credential: &Credential,
        date: CalendarDate,
    ) -> Result<DailyMinuteRecord, BackendError> {
        let user = Self::user(credential)?;
        Ok(self
            .repo
            .minutes_for_date(&user, date)
            .await?
            .unwrap_or_else(|| DailyMinuteRecord::new(date, 0)))
    }
}

#[async_trait]
impl ProgressBackend for RepositoryBackend {
    async fn record_progress(
        &self,
        credential: &Credential,
        entry: &ProgressEntry,
    ) -> Result<(), BackendError> {
        let user = Self::user(credential)?;
        Ok(self.progress.append_entry(&user, entry).await?)
    }

    async fn progress_summary(
        &self,
        credential: &Credential,
    ) -> Result<ProgressSummary, BackendError> {
        let user = Self::user(credential)?;
        let entries = self.progress.entries_for_user(&user).await?;
        Ok(ProgressSummary::from_entries(&entries))
    }

    async fn lesson_progress(
        &self,
        credential: &Credential,
    ) -> Result<Vec<LessonProgress>, BackendError> {
        let user = Self::user(credential)?;
        let entries = self.progress.entries_for_user(&user).await?;
        Ok(LessonProgress::latest(&entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use practice_core::model::ModuleName;
    use storage::repository::InMemoryRepository;

    #[test]
    fn config_keeps_path_prefix_when_joining() {
        let config = BackendConfig::new("https://example.com/tracker").unwrap();
        assert_eq!(
            config.endpoint("api/session/flush-minutes").unwrap().as_str(),
            "https://example.com/tracker/api/session/flush-minutes"
        );
        assert_eq!(config.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn config_rejects_non_http_urls() {
        assert!(matches!(
            BackendConfig::new("not a url"),
            Err(BackendConfigError::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            BackendConfig::new("ftp://example.com"),
            Err(BackendConfigError::UnsupportedScheme(_))
        ));
    }

    #[tokio::test]
    async fn repository_backend_scopes_by_credential() {
        let repo = InMemoryRepository::new();
        let backend = RepositoryBackend::new(Arc::new(repo.clone()), Arc::new(repo));
        let alice = Credential::new("alice").unwrap();
        let bob = Credential::new("bob").unwrap();
        let date = CalendarDate::from_ymd(2024, 5, 1).unwrap();

        backend.increment_minutes(&alice, date, 2).await.unwrap();
        let total = backend.increment_minutes(&alice, date, 3).await.unwrap();
        assert_eq!(total.minutes(), 5);

        assert_eq!(backend.minutes_for_date(&bob, date).await.unwrap().minutes(), 0);
        let range = backend
            .minutes_for_range(&alice, date, date)
            .await
            .unwrap();
        assert_eq!(range, vec![DailyMinuteRecord::new(date, 5)]);
    }

    #[tokio::test]
    async fn repository_progress_is_scoped_and_summarized() {
        let repo = InMemoryRepository::new();
        let backend = RepositoryBackend::new(Arc::new(repo.clone()), Arc::new(repo));
        let alice = Credential::new("alice").unwrap();
        let at = practice_core::time::fixed_now();

        let quiz = ProgressEntry::new(ModuleName::new("grammar"), 8, 10, 4, at).unwrap();
        backend.record_progress(&alice, &quiz).await.unwrap();
        let lesson = ProgressEntry::lesson("intro", 100, at).unwrap();
        backend.record_progress(&alice, &lesson).await.unwrap();

        let summary = backend.progress_summary(&alice).await.unwrap();
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.module("grammar").count, 1);
        assert_eq!(summary.module("lesson").total, 100);
        assert_eq!(
            backend.lesson_progress(&alice).await.unwrap(),
            vec![LessonProgress::new("intro", 100)]
        );

        let bob = Credential::new("bob").unwrap();
        assert_eq!(
            backend.progress_summary(&bob).await.unwrap(),
            ProgressSummary::default()
        );
    }
}
