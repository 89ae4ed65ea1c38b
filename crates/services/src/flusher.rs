//! Moves whole minutes from the session clock to the backend.
//!
//! Three paths share one lock: the boundary/safety-net path delivers the
//! clock's unclaimed minutes, the retry path delivers the Failed-Flush Buffer
//! and the upload path delivers minutes kept while signed out. A boundary
//! delivery that fails, or that has no usable credential, hands its minutes
//! to one of those durable buckets, after which only the matching path may
//! send them.

use std::sync::{Arc, Mutex, PoisonError};

use practice_core::model::{CalendarDate, FlushClaim, SessionClock, TrackerSessionId};
use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tracing::{debug, info, warn};

use crate::backend::MinuteBackend;
use crate::credentials::Credential;
use crate::error::{BackendError, TrackerError};
use crate::events::TrackerEvent;
use crate::local_cache::LocalCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No whole minute was waiting.
    Nothing,
    Delivered {
        date: CalendarDate,
        minutes: u32,
        total: u32,
    },
    Buffered {
        date: CalendarDate,
        minutes: u32,
        pending: u32,
    },
    /// No usable credential; the minutes wait in the unsynced bucket of
    /// `date` and count towards its cached `total`.
    KeptLocal {
        date: CalendarDate,
        minutes: u32,
        total: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Nothing,
    Delivered {
        date: CalendarDate,
        minutes: u32,
        total: u32,
    },
    StillPending { minutes: u32 },
    Skipped { minutes: u32 },
}

pub struct MinuteFlusher {
    session_id: TrackerSessionId,
    cache: LocalCache,
    backend: Arc<dyn MinuteBackend>,
    events: broadcast::Sender<TrackerEvent>,
    lock: AsyncMutex<()>,
}

impl MinuteFlusher {
    #[must_use]
    pub fn new(
        session_id: TrackerSessionId,
        cache: LocalCache,
        backend: Arc<dyn MinuteBackend>,
        events: broadcast::Sender<TrackerEvent>,
    ) -> Self {
        Self {
            session_id,
            cache,
            backend,
            events,
            lock: AsyncMutex::new(()),
        }
    }

    /// Deliver the clock's unclaimed whole minutes.
    ///
    /// Transport failures are not errors: the minutes are buffered and the
    /// outcome says so.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the local cache cannot be used.
    pub async fn flush(&self, session: &Mutex<SessionClock>) -> Result<FlushOutcome, TrackerError> {
        let _guard = self.lock.lock().await;
        self.flush_locked(session).await
    }

    /// Deliver the Failed-Flush Buffer against the clock's current date.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the local cache cannot be used.
    pub async fn retry_pending(
        &self,
        session: &Mutex<SessionClock>,
    ) -> Result<RetryOutcome, TrackerError> {
        let _guard = self.lock.lock().await;

        let pending = self.cache.pending_minutes().await?;
        if pending == 0 {
            return Ok(RetryOutcome::Nothing);
        }
        let Some(credential) = self.cache.credential().await? else {
            debug!(session_id = %self.session_id, minutes = pending, "not logged in; retry postponed");
            return Ok(RetryOutcome::Skipped { minutes: pending });
        };
        self.retry_locked(session, &credential, pending).await
    }

    /// Deliver the Failed-Flush Buffer with the credential that filled it
    /// before another account takes over. Minutes that still cannot be
    /// delivered are dropped.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the local cache cannot be used.
    pub async fn settle_previous_account(
        &self,
        session: &Mutex<SessionClock>,
        previous: &Credential,
    ) -> Result<RetryOutcome, TrackerError> {
        let _guard = self.lock.lock().await;

        let pending = self.cache.pending_minutes().await?;
        if pending == 0 {
            return Ok(RetryOutcome::Nothing);
        }
        let outcome = self.retry_locked(session, previous, pending).await?;
        if !matches!(outcome, RetryOutcome::Delivered { .. }) {
            let dropped = self.cache.discard_pending_minutes().await?;
            warn!(
                session_id = %self.session_id,
                minutes = dropped,
                "previous account's buffered minutes could not be delivered; dropped"
            );
        }
        Ok(outcome)
    }

    /// Deliver every day of the unsynced bucket against its own date.
    /// Stops at the first failure; returns the minutes delivered.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the local cache cannot be used.
    pub async fn upload_unsynced(
        &self,
        session: &Mutex<SessionClock>,
    ) -> Result<u32, TrackerError> {
        let _guard = self.lock.lock().await;

        let days = self.cache.unsynced_minutes().await?;
        if days.is_empty() {
            return Ok(0);
        }
        let Some(credential) = self.cache.credential().await? else {
            return Ok(0);
        };

        let mut delivered = 0;
        for (date, minutes) in days {
            let record = match self
                .backend
                .increment_minutes(&credential, date, minutes)
                .await
            {
                Ok(record) => record,
                Err(err) => {
                    warn!(
                        session_id = %self.session_id,
                        %date,
                        minutes,
                        error = %err,
                        "unsynced minutes not delivered"
                    );
                    break;
                }
            };
            self.cache.drain_unsynced_minutes(date, minutes).await?;
            {
                let mut clock = lock(session);
                if clock.date() == date {
                    clock.settle_retried(minutes);
                }
            }
            self.cache.store_minutes(date, record.minutes()).await?;
            info!(
                session_id = %self.session_id,
                %date,
                minutes,
                total = record.minutes(),
                "delivered minutes practiced while signed out"
            );
            let _ = self.events.send(TrackerEvent::Flushed {
                date,
                minutes,
                total: record.minutes(),
            });
            delivered += minutes;
        }
        Ok(delivered)
    }

    async fn retry_locked(
        &self,
        session: &Mutex<SessionClock>,
        credential: &Credential,
        pending: u32,
    ) -> Result<RetryOutcome, TrackerError> {
        let date = lock(session).date();
        match self
            .backend
            .increment_minutes(credential, date, pending)
            .await
        {
            Ok(record) => {
                self.cache.drain_pending_minutes(pending).await?;
                lock(session).settle_retried(pending);
                self.cache.store_minutes(date, record.minutes()).await?;
                info!(
                    session_id = %self.session_id,
                    %date,
                    minutes = pending,
                    total = record.minutes(),
                    "retried buffered minutes"
                );
                let _ = self.events.send(TrackerEvent::Retried {
                    date,
                    minutes: pending,
                    total: record.minutes(),
                });
                Ok(RetryOutcome::Delivered {
                    date,
                    minutes: pending,
                    total: record.minutes(),
                })
            }
            Err(BackendError::Unauthenticated) => {
                warn!(session_id = %self.session_id, minutes = pending, "credential rejected; retry postponed");
                Ok(RetryOutcome::Skipped { minutes: pending })
            }
            Err(err) => {
                warn!(session_id = %self.session_id, minutes = pending, error = %err, "retry failed");
                Ok(RetryOutcome::StillPending { minutes: pending })
            }
        }
    }

    /// If `today` differs from the clock's date, make a last delivery for
    /// the old date and start the clock on `today`. Returns the old date.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the local cache cannot be used.
    pub async fn roll_over(
        &self,
        session: &Mutex<SessionClock>,
        today: CalendarDate,
    ) -> Result<Option<CalendarDate>, TrackerError> {
        let _guard = self.lock.lock().await;
        if lock(session).date() == today {
            return Ok(None);
        }
        let outcome = self.flush_locked(session).await;
        let previous = lock(session).roll_over(today);
        self.cache.store_unflushed_seconds(today, 0).await?;
        info!(session_id = %self.session_id, %previous, current = %today, "day rolled over");
        outcome?;
        Ok(Some(previous))
    }

    async fn flush_locked(
        &self,
        session: &Mutex<SessionClock>,
    ) -> Result<FlushOutcome, TrackerError> {
        let Some(claim) = lock(session).claim_flush() else {
            return Ok(FlushOutcome::Nothing);
        };
        let Some(credential) = self.cache.credential().await? else {
            debug!(session_id = %self.session_id, minutes = claim.minutes, "not logged in; keeping minutes local");
            return self.keep_local(session, &claim).await;
        };

        match self
            .backend
            .increment_minutes(&credential, claim.date, claim.minutes)
            .await
        {
            Ok(record) => {
                lock(session).confirm_flush(&claim);
                self.cache.store_minutes(claim.date, record.minutes()).await?;
                debug!(
                    session_id = %self.session_id,
                    date = %claim.date,
                    minutes = claim.minutes,
                    total = record.minutes(),
                    "flushed minutes"
                );
                let _ = self.events.send(TrackerEvent::Flushed {
                    date: claim.date,
                    minutes: claim.minutes,
                    total: record.minutes(),
                });
                Ok(FlushOutcome::Delivered {
                    date: claim.date,
                    minutes: claim.minutes,
                    total: record.minutes(),
                })
            }
            Err(BackendError::Unauthenticated) => {
                warn!(session_id = %self.session_id, minutes = claim.minutes, "credential rejected; keeping minutes local");
                self.keep_local(session, &claim).await
            }
            Err(err) => {
                // Durable buffer first: if it cannot be written the minutes
                // stay unclaimed and the next boundary tries again.
                let pending = self.cache.add_pending_minutes(claim.minutes).await?;
                lock(session).buffer_flush(&claim);
                warn!(
                    session_id = %self.session_id,
                    date = %claim.date,
                    minutes = claim.minutes,
                    pending,
                    error = %err,
                    "flush failed; minutes buffered for retry"
                );
                let _ = self.events.send(TrackerEvent::FlushBuffered {
                    date: claim.date,
                    minutes: claim.minutes,
                });
                Ok(FlushOutcome::Buffered {
                    date: claim.date,
                    minutes: claim.minutes,
                    pending,
                })
            }
        }
    }

    async fn keep_local(
        &self,
        session: &Mutex<SessionClock>,
        claim: &FlushClaim,
    ) -> Result<FlushOutcome, TrackerError> {
        // Same ordering as the retry buffer: durable first, then release the claim.
        let held = self
            .cache
            .add_unsynced_minutes(claim.date, claim.minutes)
            .await?;
        lock(session).buffer_flush(claim);
        let total = self
            .cache
            .add_cached_minutes(claim.date, claim.minutes)
            .await?;
        debug!(
            session_id = %self.session_id,
            date = %claim.date,
            minutes = claim.minutes,
            held,
            "minutes kept until the next sign-in"
        );
        let _ = self.events.send(TrackerEvent::KeptLocal {
            date: claim.date,
            minutes: claim.minutes,
        });
        Ok(FlushOutcome::KeptLocal {
            date: claim.date,
            minutes: claim.minutes,
            total,
        })
    }
}

pub(crate) fn lock(session: &Mutex<SessionClock>) -> std::sync::MutexGuard<'_, SessionClock> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}
