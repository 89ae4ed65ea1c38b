//! Recording and reporting quiz, practice and lesson results.
//!
//! A finished exercise always bumps the device-local counter of its module;
//! the entry itself is stored by the backend only when signed in. The
//! report shows, per module, the larger of the recorded count and the local
//! counter.

use std::collections::BTreeMap;
use std::sync::Arc;

use practice_core::Clock;
use practice_core::model::{
    LESSON_MODULE, LessonProgress, ModuleName, ProgressEntry, ProgressSummary,
};
use tracing::{debug, info, warn};

use crate::backend::ProgressBackend;
use crate::credentials::Credential;
use crate::error::{BackendError, ProgressServiceError};
use crate::local_cache::LocalCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Stored by the backend; `count` is the module's local counter.
    Synced { count: u32 },
    /// Counted on this device only.
    LocalOnly { count: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressReport {
    /// `None` while signed out.
    pub summary: Option<ProgressSummary>,
    pub lessons: Vec<LessonProgress>,
    /// Practice count per module.
    pub practice: BTreeMap<String, u32>,
}

#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    cache: LocalCache,
    backend: Arc<dyn ProgressBackend>,
}

impl ProgressService {
    #[must_use]
    pub fn new(clock: Clock, cache: LocalCache, backend: Arc<dyn ProgressBackend>) -> Self {
        Self {
            clock,
            cache,
            backend,
        }
    }

    /// Record `score` out of `total` for `module`, plus the minutes spent.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Invalid` for an impossible score, or a
    /// storage/backend error. A rejected credential is not an error: the
    /// result stays local.
    pub async fn record_result(
        &self,
        module: &str,
        score: u32,
        total: u32,
        minutes: i64,
    ) -> Result<RecordOutcome, ProgressServiceError> {
        let entry = ProgressEntry::new(
            ModuleName::new(module),
            score,
            total,
            minutes,
            self.clock.now(),
        )?;
        let count = self
            .cache
            .bump_practice_count(entry.module().as_str())
            .await?;

        let Some(credential) = self.cache.credential().await? else {
            debug!(module = %entry.module(), count, "not logged in; result counted locally");
            return Ok(RecordOutcome::LocalOnly { count });
        };
        match self.backend.record_progress(&credential, &entry).await {
            Ok(()) => {
                info!(
                    module = %entry.module(),
                    score,
                    total,
                    minutes = entry.minutes(),
                    "progress recorded"
                );
                Ok(RecordOutcome::Synced { count })
            }
            Err(BackendError::Unauthenticated) => {
                warn!(module = %entry.module(), "credential rejected; result counted locally");
                Ok(RecordOutcome::LocalOnly { count })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Record that `progress` percent of `lesson_id` is done.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::NotSignedIn` without a credential,
    /// `ProgressServiceError::Invalid` for a bad id or percentage, or a
    /// storage/backend error.
    pub async fn record_lesson(
        &self,
        lesson_id: &str,
        progress: u32,
    ) -> Result<LessonProgress, ProgressServiceError> {
        let entry = ProgressEntry::lesson(lesson_id, progress, self.clock.now())?;
        let credential = self
            .cache
            .credential()
            .await?
            .ok_or(ProgressServiceError::NotSignedIn)?;
        self.backend.record_progress(&credential, &entry).await?;
        let lesson = LessonProgress::new(lesson_id.trim(), progress);
        info!(
            lesson = %lesson.lesson_id,
            progress,
            completed = lesson.completed,
            "lesson progress recorded"
        );
        Ok(lesson)
    }

    /// Totals, lessons and practice counts for the progress page.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` if the cache cannot be read or the
    /// backend fails for a reason other than a rejected credential.
    pub async fn report(&self) -> Result<ProgressReport, ProgressServiceError> {
        let local = self.cache.practice_counts().await?;
        let mut report = match self.cache.credential().await? {
            Some(credential) => self.remote_report(&credential).await?,
            None => ProgressReport::default(),
        };

        let mut practice = local.clone();
        if let Some(summary) = &report.summary {
            for module in summary.by_module.keys() {
                if module != LESSON_MODULE {
                    practice.entry(module.clone()).or_insert(0);
                }
            }
            for (module, count) in &mut practice {
                *count = summary.practice_count(module, local.get(module).copied().unwrap_or(0));
            }
        }
        report.practice = practice;
        Ok(report)
    }

    async fn remote_report(
        &self,
        credential: &Credential,
    ) -> Result<ProgressReport, ProgressServiceError> {
        let summary = match self.backend.progress_summary(credential).await {
            Ok(summary) => summary,
            Err(BackendError::Unauthenticated) => {
                warn!("credential rejected; showing local practice counts only");
                return Ok(ProgressReport::default());
            }
            Err(err) => return Err(err.into()),
        };
        let lessons = self.backend.lesson_progress(credential).await?;
        Ok(ProgressReport {
            summary: Some(summary),
            lessons,
            practice: BTreeMap::new(),
        })
    }
}
