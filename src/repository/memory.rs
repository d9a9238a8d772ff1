// src/repository/memory.rs

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        exam::Exam, exam_record::ExamResult, purchase::PurchaseRecord,
        question::QuestionSnapshot, session::ExamSession,
    },
    repository::{ExamStore, QuestionQuery, QuestionRepository},
};

/// Question bank held in memory. Counts `find` calls so callers can observe
/// how often the cache reached through to it.
#[derive(Default)]
pub struct InMemoryQuestionRepository {
    questions: RwLock<Vec<QuestionSnapshot>>,
    fetches: AtomicUsize,
    latency: Option<Duration>,
}

impl InMemoryQuestionRepository {
    pub fn new(questions: Vec<QuestionSnapshot>) -> Self {
        Self {
            questions: RwLock::new(questions),
            ..Default::default()
        }
    }

    /// Delays every `find`, which makes overlapping lookups observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub async fn insert(&self, question: QuestionSnapshot) {
        self.questions.write().await.push(question);
    }

    pub async fn remove(&self, question_id: i64) {
        self.questions.write().await.retain(|q| q.id != question_id);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuestionRepository for InMemoryQuestionRepository {
    async fn find(&self, query: &QuestionQuery) -> Result<Vec<QuestionSnapshot>, AppError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let questions = self.questions.read().await;
        Ok(questions
            .iter()
            .filter(|q| query.matches(q))
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<QuestionSnapshot>, AppError> {
        let questions = self.questions.read().await;
        Ok(questions
            .iter()
            .filter(|q| ids.contains(&q.id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct SessionTables {
    sessions: HashMap<Uuid, ExamSession>,
    /// (participant_id, exam_id) -> non-terminal session id
    active: HashMap<(i64, i64), Uuid>,
    results: HashMap<Uuid, ExamResult>,
}

/// Process-local durable store. Used by tests and when no database is
/// configured.
#[derive(Default)]
pub struct InMemoryStore {
    exams: DashMap<i64, Exam>,
    purchases: DashMap<(i64, i64), PurchaseRecord>,
    tables: Mutex<SessionTables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_exam(&self, exam: Exam) {
        self.exams.insert(exam.id, exam);
    }
}

#[async_trait]
impl ExamStore for InMemoryStore {
    async fn find_exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError> {
        Ok(self.exams.get(&exam_id).map(|e| e.value().clone()))
    }

    async fn find_purchase(
        &self,
        user_id: i64,
        exam_id: i64,
    ) -> Result<Option<PurchaseRecord>, AppError> {
        Ok(self
            .purchases
            .get(&(user_id, exam_id))
            .map(|r| r.value().clone()))
    }

    async fn insert_purchase(&self, record: &PurchaseRecord) -> Result<(), AppError> {
        match self.purchases.entry((record.user_id, record.exam_id)) {
            Entry::Occupied(_) => Err(AppError::DuplicatePurchase {
                user_id: record.user_id,
                exam_id: record.exam_id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn increment_repetition(
        &self,
        user_id: i64,
        exam_id: i64,
    ) -> Result<PurchaseRecord, AppError> {
        // The shard write lock is held for the whole check-and-increment.
        let mut record = self
            .purchases
            .get_mut(&(user_id, exam_id))
            .ok_or_else(|| AppError::NotFound("Purchase record not found".to_string()))?;

        if !record.can_repeat() {
            return Err(AppError::MaxRepetitionsExceeded {
                max_repetitions: record.max_repetitions,
            });
        }
        record.repetition_count += 1;
        Ok(record.clone())
    }

    async fn create_session(&self, session: ExamSession) -> Result<ExamSession, AppError> {
        let mut tables = self.tables.lock().await;
        let key = (session.participant_id, session.exam_id);

        if let Some(existing) = tables.active.get(&key).and_then(|id| tables.sessions.get(id)) {
            return Ok(existing.clone());
        }

        tables.active.insert(key, session.id);
        tables.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<ExamSession>, AppError> {
        Ok(self.tables.lock().await.sessions.get(&session_id).cloned())
    }

    async fn find_session_for_attempt(
        &self,
        participant_id: i64,
        exam_id: i64,
        attempt: u32,
    ) -> Result<Option<ExamSession>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .values()
            .filter(|s| {
                s.participant_id == participant_id && s.exam_id == exam_id && s.attempt == attempt
            })
            .max_by_key(|s| s.start_time)
            .cloned())
    }

    async fn update_session(&self, session: &ExamSession) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        let stored = tables
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

        if stored.is_terminal() || session.is_terminal() {
            return Err(AppError::InvalidState(
                "Completed sessions cannot be modified".to_string(),
            ));
        }
        *stored = session.clone();
        Ok(())
    }

    async fn complete_session(
        &self,
        session: &ExamSession,
        result: &ExamResult,
    ) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        match tables.sessions.get(&session.id) {
            None => return Err(AppError::NotFound("Session not found".to_string())),
            Some(stored) if stored.is_terminal() => {
                return Err(AppError::InvalidState(
                    "Session is already completed".to_string(),
                ));
            }
            Some(_) => {}
        }

        tables.sessions.insert(session.id, session.clone());
        tables
            .active
            .remove(&(session.participant_id, session.exam_id));
        tables.results.insert(session.id, result.clone());
        Ok(())
    }

    async fn find_result(&self, session_id: Uuid) -> Result<Option<ExamResult>, AppError> {
        Ok(self.tables.lock().await.results.get(&session_id).cloned())
    }

    async fn list_in_progress_sessions(&self) -> Result<Vec<ExamSession>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .active
            .values()
            .filter_map(|id| tables.sessions.get(id))
            .cloned()
            .collect())
    }
}
