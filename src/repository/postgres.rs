// src/repository/postgres.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, types::Json};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        exam::{Exam, ExamConfiguration},
        exam_record::ExamResult,
        purchase::PurchaseRecord,
        question::{Difficulty, QuestionSnapshot, QuestionType},
        session::{Answer, ExamSession, SessionCounters, SessionStatus},
    },
    repository::{ExamStore, QuestionQuery, QuestionRepository},
};

/// Row shape of the 'questions' table.
#[derive(Debug, FromRow)]
struct QuestionRow {
    id: i64,
    subject_id: i64,
    question_type: String,
    content: String,
    options: Json<Vec<String>>,
    answer: Json<Vec<String>>,
    analysis: Option<String>,
    difficulty: String,
    category: String,
    tags: Vec<String>,
}

impl TryFrom<QuestionRow> for QuestionSnapshot {
    type Error = AppError;

    fn try_from(row: QuestionRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = move |e: AppError| AppError::Internal(format!("Question {}: {}", id, e));
        Ok(QuestionSnapshot {
            id: row.id,
            subject_id: row.subject_id,
            question_type: row.question_type.parse::<QuestionType>().map_err(corrupt)?,
            difficulty: row.difficulty.parse::<Difficulty>().map_err(corrupt)?,
            content: row.content,
            options: row.options.0,
            answer: row.answer.0,
            analysis: row.analysis,
            category: row.category,
            tags: row.tags,
        })
    }
}

const QUESTION_COLUMNS: &str = "id, subject_id, type AS question_type, content, options, answer, \
                                analysis, difficulty, category, tags";

pub struct PgQuestionRepository {
    pool: PgPool,
}

impl PgQuestionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuestionRepository for PgQuestionRepository {
    async fn find(&self, query: &QuestionQuery) -> Result<Vec<QuestionSnapshot>, AppError> {
        let sql = format!(
            "SELECT {QUESTION_COLUMNS} FROM questions
             WHERE subject_id = $1
               AND difficulty = $2
               AND (cardinality($3::text[]) = 0 OR category = ANY($3))
               AND (cardinality($4::text[]) = 0 OR tags && $4)
             ORDER BY RANDOM()
             LIMIT $5"
        );
        let rows: Vec<QuestionRow> = sqlx::query_as(&sql)
            .bind(query.subject_id)
            .bind(query.difficulty.as_str())
            .bind(&query.categories)
            .bind(&query.tags)
            .bind(query.limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(QuestionSnapshot::try_from).collect()
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<QuestionSnapshot>, AppError> {
        let sql = format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = ANY($1)");
        let rows: Vec<QuestionRow> = sqlx::query_as(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(QuestionSnapshot::try_from).collect()
    }
}

#[derive(Debug, FromRow)]
struct ExamRow {
    id: i64,
    subject_id: i64,
    title: String,
    is_published: bool,
    is_active: bool,
    configuration: Json<ExamConfiguration>,
}

impl From<ExamRow> for Exam {
    fn from(row: ExamRow) -> Self {
        Exam {
            id: row.id,
            subject_id: row.subject_id,
            title: row.title,
            is_published: row.is_published,
            is_active: row.is_active,
            configuration: row.configuration.0,
        }
    }
}

#[derive(Debug, FromRow)]
struct PurchaseRow {
    user_id: i64,
    exam_id: i64,
    subject_id: i64,
    question_ids: Vec<i64>,
    repetition_count: i32,
    max_repetitions: i32,
    purchased_at: DateTime<Utc>,
}

impl From<PurchaseRow> for PurchaseRecord {
    fn from(row: PurchaseRow) -> Self {
        PurchaseRecord {
            user_id: row.user_id,
            exam_id: row.exam_id,
            subject_id: row.subject_id,
            question_ids: row.question_ids,
            repetition_count: row.repetition_count.max(0) as u32,
            max_repetitions: row.max_repetitions.max(0) as u32,
            purchased_at: row.purchased_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    exam_id: i64,
    participant_id: i64,
    status: String,
    question_ids: Vec<i64>,
    attempt: i32,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    time_limit_seconds: Option<i32>,
    time_remaining_seconds: Option<i64>,
    paused_at: Option<DateTime<Utc>>,
    answers: Json<HashMap<i64, Answer>>,
    counters: Json<SessionCounters>,
}

impl TryFrom<SessionRow> for ExamSession {
    type Error = AppError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(ExamSession {
            id: row.id,
            exam_id: row.exam_id,
            participant_id: row.participant_id,
            status: SessionStatus::parse(&row.status)?,
            question_ids: row.question_ids,
            attempt: row.attempt.max(0) as u32,
            start_time: row.start_time,
            end_time: row.end_time,
            time_limit_seconds: row.time_limit_seconds.map(|s| s.max(0) as u32),
            time_remaining_seconds: row.time_remaining_seconds,
            paused_at: row.paused_at,
            answers: row.answers.0,
            counters: row.counters.0,
        })
    }
}

const SESSION_COLUMNS: &str = "id, exam_id, participant_id, status, question_ids, attempt, \
                               start_time, end_time, time_limit_seconds, time_remaining_seconds, \
                               paused_at, answers, counters";

/// Durable store on Postgres. Uniqueness and the repetition ceiling are
/// enforced by the database, not by reads made beforehand.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn session_where(
        &self,
        clause: &str,
        participant_id: i64,
        exam_id: i64,
    ) -> Result<Option<ExamSession>, AppError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM exam_sessions WHERE {clause}");
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(participant_id)
            .bind(exam_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ExamSession::try_from).transpose()
    }

    /// Explains why a guarded session update touched no row.
    async fn rejected_update(&self, session_id: Uuid) -> AppError {
        match self.find_session(session_id).await {
            Ok(Some(_)) => AppError::InvalidState("Session is already completed".to_string()),
            Ok(None) => AppError::NotFound("Session not found".to_string()),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl ExamStore for PgStore {
    async fn find_exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError> {
        let row: Option<ExamRow> = sqlx::query_as(
            "SELECT id, subject_id, title, is_published, is_active, configuration
             FROM exams WHERE id = $1",
        )
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Exam::from))
    }

    async fn find_purchase(
        &self,
        user_id: i64,
        exam_id: i64,
    ) -> Result<Option<PurchaseRecord>, AppError> {
        let row: Option<PurchaseRow> = sqlx::query_as(
            "SELECT * FROM purchase_records WHERE user_id = $1 AND exam_id = $2",
        )
        .bind(user_id)
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PurchaseRecord::from))
    }

    async fn insert_purchase(&self, record: &PurchaseRecord) -> Result<(), AppError> {
        let inserted = sqlx::query(
            "INSERT INTO purchase_records
                (user_id, exam_id, subject_id, question_ids, repetition_count, max_repetitions, purchased_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (user_id, exam_id) DO NOTHING",
        )
        .bind(record.user_id)
        .bind(record.exam_id)
        .bind(record.subject_id)
        .bind(&record.question_ids)
        .bind(record.repetition_count as i32)
        .bind(record.max_repetitions as i32)
        .bind(record.purchased_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(AppError::DuplicatePurchase {
                user_id: record.user_id,
                exam_id: record.exam_id,
            });
        }
        Ok(())
    }

    async fn increment_repetition(
        &self,
        user_id: i64,
        exam_id: i64,
    ) -> Result<PurchaseRecord, AppError> {
        let updated: Option<PurchaseRow> = sqlx::query_as(
            "UPDATE purchase_records
             SET repetition_count = repetition_count + 1
             WHERE user_id = $1 AND exam_id = $2 AND repetition_count < max_repetitions
             RETURNING *",
        )
        .bind(user_id)
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return Ok(row.into());
        }
        match self.find_purchase(user_id, exam_id).await? {
            Some(record) => Err(AppError::MaxRepetitionsExceeded {
                max_repetitions: record.max_repetitions,
            }),
            None => Err(AppError::NotFound("Purchase record not found".to_string())),
        }
    }

    async fn create_session(&self, session: ExamSession) -> Result<ExamSession, AppError> {
        let inserted = sqlx::query(
            "INSERT INTO exam_sessions
                (id, exam_id, participant_id, status, question_ids, attempt, start_time, end_time,
                 time_limit_seconds, time_remaining_seconds, paused_at, answers, counters)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (participant_id, exam_id) WHERE status <> 'COMPLETED' DO NOTHING",
        )
        .bind(session.id)
        .bind(session.exam_id)
        .bind(session.participant_id)
        .bind(session.status.as_str())
        .bind(&session.question_ids)
        .bind(session.attempt as i32)
        .bind(session.start_time)
        .bind(session.end_time)
        .bind(session.time_limit_seconds.map(|s| s as i32))
        .bind(session.time_remaining_seconds)
        .bind(session.paused_at)
        .bind(Json(&session.answers))
        .bind(Json(&session.counters))
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(session);
        }
        self.session_where(
            "participant_id = $1 AND exam_id = $2 AND status <> 'COMPLETED'",
            session.participant_id,
            session.exam_id,
        )
        .await?
        .ok_or_else(|| AppError::InvalidState("Session changed concurrently, retry".to_string()))
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<ExamSession>, AppError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM exam_sessions WHERE id = $1");
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ExamSession::try_from).transpose()
    }

    async fn find_session_for_attempt(
        &self,
        participant_id: i64,
        exam_id: i64,
        attempt: u32,
    ) -> Result<Option<ExamSession>, AppError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM exam_sessions
             WHERE participant_id = $1 AND exam_id = $2 AND attempt = $3
             ORDER BY start_time DESC
             LIMIT 1"
        );
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(participant_id)
            .bind(exam_id)
            .bind(attempt as i32)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ExamSession::try_from).transpose()
    }

    async fn update_session(&self, session: &ExamSession) -> Result<(), AppError> {
        if session.is_terminal() {
            return Err(AppError::InvalidState(
                "Completed sessions cannot be modified".to_string(),
            ));
        }

        let updated = sqlx::query(
            "UPDATE exam_sessions
             SET status = $2, time_remaining_seconds = $3, paused_at = $4, answers = $5, counters = $6
             WHERE id = $1 AND status <> 'COMPLETED'",
        )
        .bind(session.id)
        .bind(session.status.as_str())
        .bind(session.time_remaining_seconds)
        .bind(session.paused_at)
        .bind(Json(&session.answers))
        .bind(Json(&session.counters))
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.rejected_update(session.id).await);
        }
        Ok(())
    }

    async fn complete_session(
        &self,
        session: &ExamSession,
        result: &ExamResult,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE exam_sessions
             SET status = $2, end_time = $3, time_remaining_seconds = $4, paused_at = NULL,
                 answers = $5, counters = $6
             WHERE id = $1 AND status <> 'COMPLETED'",
        )
        .bind(session.id)
        .bind(SessionStatus::Completed.as_str())
        .bind(session.end_time)
        .bind(session.time_remaining_seconds)
        .bind(Json(&session.answers))
        .bind(Json(&session.counters))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.rejected_update(session.id).await);
        }

        sqlx::query(
            "INSERT INTO exam_results (session_id, participant_id, exam_id, payload, completed_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(result.session_id)
        .bind(result.participant_id)
        .bind(result.exam_id)
        .bind(Json(result))
        .bind(result.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_result(&self, session_id: Uuid) -> Result<Option<ExamResult>, AppError> {
        let payload: Option<Json<ExamResult>> =
            sqlx::query_scalar("SELECT payload FROM exam_results WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(payload.map(|p| p.0))
    }

    async fn list_in_progress_sessions(&self) -> Result<Vec<ExamSession>, AppError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM exam_sessions WHERE status = '{}'",
            SessionStatus::InProgress.as_str()
        );
        let rows: Vec<SessionRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(ExamSession::try_from).collect()
    }
}
