//! Quiz, practice and lesson results kept alongside the minute totals.
//!
//! Every finished exercise appends one `ProgressEntry`. The progress page
//! never reads entries one by one; it shows the per-module tally built by
//! [`ProgressSummary::from_entries`] and the latest state of each lesson.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Module used when a result names none.
pub const DEFAULT_MODULE: &str = "session";
/// Module of lesson progress entries.
pub const LESSON_MODULE: &str = "lesson";
/// Lesson progress is a percentage; this value marks a completed lesson.
pub const LESSON_COMPLETE: u32 = 100;
/// Upper bound of the minutes one entry may carry.
pub const MAX_ENTRY_MINUTES: u32 = 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("score {score} exceeds total {total}")]
    ScoreAboveTotal { score: u32, total: u32 },

    #[error("lesson progress must be at most 100, got {0}")]
    LessonOutOfRange(u32),

    #[error("lesson id must not be empty")]
    EmptyLessonId,
}

/// Name of the practice area a result belongs to (`grammar`, `vocabulary`...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ModuleName(String);

impl ModuleName {
    /// Trims the name; a blank name becomes [`DEFAULT_MODULE`].
    #[must_use]
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Self(DEFAULT_MODULE.to_string())
        } else {
            Self(trimmed.to_string())
        }
    }

    #[must_use]
    pub fn lesson() -> Self {
        Self(LESSON_MODULE.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ModuleName {
    fn default() -> Self {
        Self(DEFAULT_MODULE.to_string())
    }
}

impl From<String> for ModuleName {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<ModuleName> for String {
    fn from(value: ModuleName) -> Self {
        value.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One finished exercise: `score` out of `total`, plus the minutes spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    module: ModuleName,
    lesson_id: Option<String>,
    score: u32,
    total: u32,
    minutes: u32,
    recorded_at: DateTime<Utc>,
}

impl ProgressEntry {
    /// Build a quiz or practice result. `minutes` is clamped to
    /// `0..=MAX_ENTRY_MINUTES`.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::ScoreAboveTotal` if `score > total`.
    pub fn new(
        module: ModuleName,
        score: u32,
        total: u32,
        minutes: i64,
        recorded_at: DateTime<Utc>,
    ) -> Result<Self, ProgressError> {
        if score > total {
            return Err(ProgressError::ScoreAboveTotal { score, total });
        }
        let minutes = minutes.clamp(0, i64::from(MAX_ENTRY_MINUTES));
        Ok(Self {
            module,
            lesson_id: None,
            score,
            total,
            minutes: u32::try_from(minutes).unwrap_or(MAX_ENTRY_MINUTES),
            recorded_at,
        })
    }

    /// Build a lesson progress entry: `progress` percent of lesson `lesson_id`.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` if the id is blank or `progress` exceeds 100.
    pub fn lesson(
        lesson_id: &str,
        progress: u32,
        recorded_at: DateTime<Utc>,
    ) -> Result<Self, ProgressError> {
        let lesson_id = lesson_id.trim();
        if lesson_id.is_empty() {
            return Err(ProgressError::EmptyLessonId);
        }
        if progress > LESSON_COMPLETE {
            return Err(ProgressError::LessonOutOfRange(progress));
        }
        Ok(Self {
            module: ModuleName::lesson(),
            lesson_id: Some(lesson_id.to_string()),
            score: progress,
            total: LESSON_COMPLETE,
            minutes: 0,
            recorded_at,
        })
    }

    #[must_use]
    pub fn module(&self) -> &ModuleName {
        &self.module
    }

    #[must_use]
    pub fn lesson_id(&self) -> Option<&str> {
        self.lesson_id.as_deref()
    }

    #[must_use]
    pub fn score(&self) -> u32 {
        self.score
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    #[must_use]
    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    #[must_use]
    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}

/// Running totals of one module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleTally {
    pub score: u64,
    pub total: u64,
    pub count: u32,
}

/// Aggregate over all of a user's entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub entries: u32,
    pub total_score: u64,
    pub total_possible: u64,
    pub by_module: BTreeMap<String, ModuleTally>,
}

impl ProgressSummary {
    #[must_use]
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a ProgressEntry>,
    {
        let mut summary = Self::default();
        for entry in entries {
            summary.entries = summary.entries.saturating_add(1);
            summary.total_score += u64::from(entry.score);
            summary.total_possible += u64::from(entry.total);
            let tally = summary
                .by_module
                .entry(entry.module.as_str().to_string())
                .or_default();
            tally.score += u64::from(entry.score);
            tally.total += u64::from(entry.total);
            tally.count = tally.count.saturating_add(1);
        }
        summary
    }

    /// Tally of `module`; all zero when it was never practiced.
    #[must_use]
    pub fn module(&self, module: &str) -> ModuleTally {
        self.by_module.get(module).copied().unwrap_or_default()
    }

    /// Overall score as a rounded percentage; `None` before any scored entry.
    #[must_use]
    pub fn accuracy(&self) -> Option<u32> {
        if self.total_possible == 0 {
            return None;
        }
        let percent = (self.total_score * 100 + self.total_possible / 2) / self.total_possible;
        Some(u32::try_from(percent).unwrap_or(100))
    }

    /// Times `module` was practiced, taking the larger of the recorded
    /// count and a device-local counter that may include unsynced sessions.
    #[must_use]
    pub fn practice_count(&self, module: &str, local: u32) -> u32 {
        self.module(module).count.max(local)
    }
}

/// Latest known state of one lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonProgress {
    pub lesson_id: String,
    pub progress: u32,
    pub completed: bool,
}

impl LessonProgress {
    #[must_use]
    pub fn new(lesson_id: impl Into<String>, progress: u32) -> Self {
        let progress = progress.min(LESSON_COMPLETE);
        Self {
            lesson_id: lesson_id.into(),
            progress,
            completed: progress == LESSON_COMPLETE,
        }
    }

    /// Most recent entry per lesson, ordered by lesson id.
    #[must_use]
    pub fn latest<'a, I>(entries: I) -> Vec<Self>
    where
        I: IntoIterator<Item = &'a ProgressEntry>,
    {
        let mut latest: BTreeMap<&str, &ProgressEntry> = BTreeMap::new();
        for entry in entries {
            let Some(id) = entry.lesson_id() else {
                continue;
            };
            match latest.get(id) {
                Some(seen) if seen.recorded_at > entry.recorded_at => {}
                _ => {
                    latest.insert(id, entry);
                }
            }
        }
        latest
            .into_iter()
            .map(|(id, entry)| Self::new(id, entry.score))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn quiz(module: &str, score: u32, total: u32) -> ProgressEntry {
        ProgressEntry::new(ModuleName::new(module), score, total, 5, fixed_now()).unwrap()
    }

    #[test]
    fn blank_module_falls_back_to_session() {
        assert_eq!(ModuleName::new("  ").as_str(), DEFAULT_MODULE);
        assert_eq!(ModuleName::new(" grammar ").as_str(), "grammar");
    }

    #[test]
    fn minutes_are_clamped_and_score_checked() {
        let long = ProgressEntry::new(ModuleName::default(), 0, 0, 600, fixed_now()).unwrap();
        assert_eq!(long.minutes(), MAX_ENTRY_MINUTES);
        let negative = ProgressEntry::new(ModuleName::default(), 0, 0, -3, fixed_now()).unwrap();
        assert_eq!(negative.minutes(), 0);

        assert_eq!(
            ProgressEntry::new(ModuleName::new("grammar"), 11, 10, 1, fixed_now()),
            Err(ProgressError::ScoreAboveTotal { score: 11, total: 10 })
        );
    }

    #[test]
    fn lesson_entries_are_percentages() {
        let entry = ProgressEntry::lesson("intro", 40, fixed_now()).unwrap();
        assert_eq!(entry.module().as_str(), LESSON_MODULE);
        assert_eq!(entry.lesson_id(), Some("intro"));
        assert_eq!(entry.total(), LESSON_COMPLETE);

        assert_eq!(
            ProgressEntry::lesson("intro", 101, fixed_now()),
            Err(ProgressError::LessonOutOfRange(101))
        );
        assert_eq!(
            ProgressEntry::lesson(" ", 10, fixed_now()),
            Err(ProgressError::EmptyLessonId)
        );
    }

    #[test]
    fn summary_tallies_per_module() {
        let entries = [
            quiz("grammar", 8, 10),
            quiz("grammar", 5, 10),
            quiz("vocabulary", 3, 4),
        ];
        let summary = ProgressSummary::from_entries(&entries);

        assert_eq!(summary.entries, 3);
        assert_eq!(summary.total_score, 16);
        assert_eq!(summary.total_possible, 24);
        assert_eq!(
            summary.module("grammar"),
            ModuleTally {
                score: 13,
                total: 20,
                count: 2
            }
        );
        assert_eq!(summary.module("speechRecognition"), ModuleTally::default());
        assert_eq!(summary.accuracy(), Some(67));
    }

    #[test]
    fn practice_count_prefers_the_larger_source() {
        let summary = ProgressSummary::from_entries(&[quiz("grammar", 1, 1)]);
        assert_eq!(summary.practice_count("grammar", 4), 4);
        assert_eq!(summary.practice_count("grammar", 0), 1);
        assert_eq!(ProgressSummary::default().accuracy(), None);
    }

    #[test]
    fn latest_lesson_state_wins() {
        let later = fixed_now() + Duration::minutes(10);
        let entries = [
            ProgressEntry::lesson("b", 100, fixed_now()).unwrap(),
            ProgressEntry::lesson("a", 80, later).unwrap(),
            ProgressEntry::lesson("a", 30, fixed_now()).unwrap(),
            quiz("grammar", 1, 2),
        ];

        assert_eq!(
            LessonProgress::latest(&entries),
            vec![LessonProgress::new("a", 80), LessonProgress::new("b", 100)]
        );
        assert!(LessonProgress::new("b", 100).completed);
    }
}
