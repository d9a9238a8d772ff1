// src/repository/mod.rs

//! Narrow interfaces to the collaborators this service does not own: the
//! question bank, the entitlement check and the durable store.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        exam::Exam,
        exam_record::ExamResult,
        purchase::PurchaseRecord,
        question::{Difficulty, QuestionSnapshot},
        session::ExamSession,
    },
};

pub mod memory;
pub mod postgres;

/// Filter for drawing candidate questions out of the question bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionQuery {
    pub subject_id: i64,
    /// Empty means any category.
    pub categories: Vec<String>,
    pub difficulty: Difficulty,
    /// Empty means any tags; otherwise a question must carry at least one.
    pub tags: Vec<String>,
    pub limit: usize,
}

impl QuestionQuery {
    pub fn matches(&self, q: &QuestionSnapshot) -> bool {
        q.subject_id == self.subject_id
            && q.difficulty == self.difficulty
            && (self.categories.is_empty() || self.categories.contains(&q.category))
            && (self.tags.is_empty() || q.tags.iter().any(|t| self.tags.contains(t)))
    }
}

#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// Returns up to `query.limit` distinct matching questions.
    async fn find(&self, query: &QuestionQuery) -> Result<Vec<QuestionSnapshot>, AppError>;

    /// Resolves ids back to questions. Unknown ids are skipped.
    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<QuestionSnapshot>, AppError>;
}

#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn has_access(&self, user_id: i64, exam_id: i64) -> Result<bool, AppError>;
}

/// Durable storage for everything this service writes.
#[async_trait]
pub trait ExamStore: Send + Sync {
    async fn find_exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError>;

    async fn find_purchase(
        &self,
        user_id: i64,
        exam_id: i64,
    ) -> Result<Option<PurchaseRecord>, AppError>;

    /// Create-if-absent. Fails with `DuplicatePurchase` when a record for the
    /// same (user, exam) already exists.
    async fn insert_purchase(&self, record: &PurchaseRecord) -> Result<(), AppError>;

    /// Atomic check-and-increment of `repetition_count`.
    /// Fails with `NotFound` or `MaxRepetitionsExceeded`.
    async fn increment_repetition(
        &self,
        user_id: i64,
        exam_id: i64,
    ) -> Result<PurchaseRecord, AppError>;

    /// Inserts the session unless the participant already has a non-terminal
    /// session for the exam, in which case that one is returned.
    async fn create_session(&self, session: ExamSession) -> Result<ExamSession, AppError>;

    async fn find_session(&self, session_id: Uuid) -> Result<Option<ExamSession>, AppError>;

    /// Latest session a participant opened for one purchase repetition.
    async fn find_session_for_attempt(
        &self,
        participant_id: i64,
        exam_id: i64,
        attempt: u32,
    ) -> Result<Option<ExamSession>, AppError>;

    /// Persists a non-terminal session. Completed sessions are immutable.
    async fn update_session(&self, session: &ExamSession) -> Result<(), AppError>;

    /// Writes the completed session and its result in one step.
    async fn complete_session(
        &self,
        session: &ExamSession,
        result: &ExamResult,
    ) -> Result<(), AppError>;

    async fn find_result(&self, session_id: Uuid) -> Result<Option<ExamResult>, AppError>;

    async fn list_in_progress_sessions(&self) -> Result<Vec<ExamSession>, AppError>;
}

/// Entitlement backed by purchase records: whoever holds one may sit the exam.
pub struct PurchaseAccess {
    store: Arc<dyn ExamStore>,
}

impl PurchaseAccess {
    pub fn new(store: Arc<dyn ExamStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AccessPolicy for PurchaseAccess {
    async fn has_access(&self, user_id: i64, exam_id: i64) -> Result<bool, AppError> {
        Ok(self.store.find_purchase(user_id, exam_id).await?.is_some())
    }
}

/// Resolves snapshot ids to full questions, preserving the id order.
/// A question that no longer exists is a `NotFound`.
pub async fn resolve_snapshot(
    repository: &dyn QuestionRepository,
    ids: &[i64],
) -> Result<Vec<QuestionSnapshot>, AppError> {
    let mut by_id: HashMap<i64, QuestionSnapshot> = repository
        .find_by_ids(ids)
        .await?
        .into_iter()
        .map(|q| (q.id, q))
        .collect();

    ids.iter()
        .map(|id| {
            by_id
                .remove(id)
                .ok_or_else(|| AppError::NotFound(format!("Question {} no longer exists", id)))
        })
        .collect()
}
