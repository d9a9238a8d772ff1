// src/services/session.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        exam_record::ExamResult,
        session::{ExamSession, SubmitAnswerRequest},
    },
    repository::{AccessPolicy, ExamStore, QuestionRepository, resolve_snapshot},
    services::{
        analytics::{self, AnalyticsThresholds},
        scoring,
    },
};

/// Drives exam sessions through NOT_STARTED -> IN_PROGRESS -> COMPLETED.
///
/// Mutations of one session are serialized through a per-session lock, so
/// duplicate submissions cannot interleave their read-modify-write.
pub struct SessionManager {
    store: Arc<dyn ExamStore>,
    repository: Arc<dyn QuestionRepository>,
    access: Arc<dyn AccessPolicy>,
    thresholds: AnalyticsThresholds,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn ExamStore>,
        repository: Arc<dyn QuestionRepository>,
        access: Arc<dyn AccessPolicy>,
        thresholds: AnalyticsThresholds,
    ) -> Self {
        Self {
            store,
            repository,
            access,
            thresholds,
            locks: DashMap::new(),
        }
    }

    /// Waits for exclusive access to one session.
    async fn lock_session(&self, session_id: Uuid) -> SessionGuard<'_> {
        let lock = Arc::clone(self.locks.entry(session_id).or_default().value());
        SessionGuard {
            locks: &self.locks,
            session_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn load(&self, session_id: Uuid) -> Result<ExamSession, AppError> {
        self.store
            .find_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))
    }

    /// Admits a participant, or returns their session already in progress.
    pub async fn start(&self, exam_id: i64, participant_id: i64) -> Result<ExamSession, AppError> {
        let exam = self
            .store
            .find_exam(exam_id)
            .await?
            .filter(|e| e.is_available())
            .ok_or_else(|| AppError::NotFound("Exam not found or not available".to_string()))?;

        if !self.access.has_access(participant_id, exam_id).await? {
            warn!(exam_id, participant_id, "session start denied, no entitlement");
            return Err(AppError::AccessDenied {
                message: "Purchase required to start this exam".to_string(),
                pricing: exam.configuration.pricing.clone(),
            });
        }

        let purchase = self
            .store
            .find_purchase(participant_id, exam_id)
            .await?
            .ok_or_else(|| {
                AppError::InvalidState("No questions have been allocated for this exam".to_string())
            })?;

        if let Some(existing) = self
            .store
            .find_session_for_attempt(participant_id, exam_id, purchase.repetition_count)
            .await?
        {
            if existing.is_terminal() {
                return Err(AppError::InvalidState(format!(
                    "Attempt {} is already completed, request a repetition first",
                    existing.attempt
                )));
            }
            return Ok(existing);
        }

        let session = ExamSession::start(
            exam.id,
            participant_id,
            purchase.question_ids.clone(),
            purchase.repetition_count,
            exam.configuration.time_limit_minutes.map(|m| m * 60),
            Utc::now(),
        );
        let session = self.store.create_session(session).await?;
        info!(
            session_id = %session.id,
            exam_id,
            participant_id,
            attempt = session.attempt,
            "exam session in progress"
        );
        Ok(session)
    }

    pub async fn get(&self, session_id: Uuid, caller_id: i64) -> Result<ExamSession, AppError> {
        let mut session = self.load(session_id).await?;
        session.ensure_participant(caller_id)?;
        session.refresh_time_remaining(Utc::now());
        Ok(session)
    }

    /// Upserts one answer. State is checked before the payload, so a completed
    /// session rejects every submission the same way.
    pub async fn submit_answer(
        &self,
        session_id: Uuid,
        caller_id: i64,
        request: SubmitAnswerRequest,
    ) -> Result<ExamSession, AppError> {
        let _guard = self.lock_session(session_id).await;

        let mut session = self.load(session_id).await?;
        session.ensure_participant(caller_id)?;
        session.ensure_in_progress()?;
        request.validate()?;

        let now = Utc::now();
        session.upsert_answer(request.into_answer(now))?;
        session.refresh_time_remaining(now);
        self.store.update_session(&session).await?;
        Ok(session)
    }

    pub async fn pause(&self, session_id: Uuid, caller_id: i64) -> Result<ExamSession, AppError> {
        self.transition(session_id, caller_id, |s, now| s.pause(now))
            .await
    }

    pub async fn resume(&self, session_id: Uuid, caller_id: i64) -> Result<ExamSession, AppError> {
        self.transition(session_id, caller_id, |s, now| s.resume(now))
            .await
    }

    async fn transition<F>(
        &self,
        session_id: Uuid,
        caller_id: i64,
        apply: F,
    ) -> Result<ExamSession, AppError>
    where
        F: FnOnce(&mut ExamSession, DateTime<Utc>) -> Result<(), AppError>,
    {
        let _guard = self.lock_session(session_id).await;

        let mut session = self.load(session_id).await?;
        session.ensure_participant(caller_id)?;
        apply(&mut session, Utc::now())?;
        self.store.update_session(&session).await?;
        Ok(session)
    }

    pub async fn finish(
        &self,
        session_id: Uuid,
        caller_id: i64,
    ) -> Result<(ExamSession, ExamResult), AppError> {
        let _guard = self.lock_session(session_id).await;

        let session = self.load(session_id).await?;
        session.ensure_participant(caller_id)?;
        self.complete(session).await
    }

    /// Scores the session and persists it, with its result, as COMPLETED.
    /// Caller must hold the session lock.
    async fn complete(&self, mut session: ExamSession) -> Result<(ExamSession, ExamResult), AppError> {
        session.ensure_in_progress()?;

        let exam = self
            .store
            .find_exam(session.exam_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))?;
        let questions = resolve_snapshot(self.repository.as_ref(), &session.question_ids).await?;

        let now = Utc::now();
        session.complete(now)?;

        let config = &exam.configuration;
        let outcome = scoring::score(&questions, &session.answers, &config.weights, config.passing_score);
        let analytics = analytics::analyze(
            &outcome.detailed_results,
            session.counters.time_spent_seconds,
            &self.thresholds,
        );

        let result = ExamResult {
            session_id: session.id,
            exam_id: session.exam_id,
            participant_id: session.participant_id,
            score: outcome.score,
            max_score: outcome.max_score,
            percentage: outcome.percentage,
            correct_answers: outcome.correct_answers,
            incorrect_answers: outcome.incorrect_answers,
            unanswered_questions: outcome.unanswered_questions,
            result_status: outcome.result_status,
            detailed_results: outcome.detailed_results,
            analytics,
            completed_at: now,
        };

        self.store.complete_session(&session, &result).await?;
        info!(
            session_id = %session.id,
            score = result.score,
            percentage = result.percentage,
            status = ?result.result_status,
            "exam session completed"
        );
        Ok((session, result))
    }

    pub async fn result(&self, session_id: Uuid, caller_id: i64) -> Result<ExamResult, AppError> {
        let result = self
            .store
            .find_result(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Result not found".to_string()))?;

        if result.participant_id != caller_id {
            return Err(AppError::Forbidden(
                "Result belongs to another participant".to_string(),
            ));
        }
        Ok(result)
    }

    /// Completes every in-progress session whose time budget ran out by `now`.
    /// Returns how many were completed.
    pub async fn finish_expired(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let mut finished = 0;

        for candidate in self.store.list_in_progress_sessions().await? {
            if !candidate.is_expired(now) {
                continue;
            }

            let _guard = self.lock_session(candidate.id).await;

            let session = match self.load(candidate.id).await {
                Ok(session) if session.is_expired(now) => session,
                Ok(_) => continue,
                Err(e) => {
                    warn!(session_id = %candidate.id, "failed to reload expiring session: {}", e);
                    continue;
                }
            };
            match self.complete(session).await {
                Ok(_) => finished += 1,
                Err(e) => warn!(session_id = %candidate.id, "failed to auto-finish session: {}", e),
            }
        }

        if finished > 0 {
            info!(finished, "auto-finished expired sessions");
        }
        Ok(finished)
    }
}

/// Exclusive hold on one session. On drop the mutex is released first, then
/// the map entry is removed unless another caller still references it.
struct SessionGuard<'a> {
    locks: &'a DashMap<Uuid, Arc<Mutex<()>>>,
    session_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
