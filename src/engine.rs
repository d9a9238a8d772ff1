// src/engine.rs

//! The process-wide entry point. Built once at startup and shared by handle;
//! owns one cache, one allocation service and one session manager.

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        exam::{DifficultyDistribution, Exam},
        exam_record::ExamResult,
        session::{ExamSession, SubmitAnswerRequest},
    },
    repository::{AccessPolicy, ExamStore, QuestionRepository},
    services::{
        allocation::{Allocation, AllocationConfig, AllocationRequest, AllocationService},
        analytics::AnalyticsThresholds,
        cache::{CacheConfig, CacheStats, QuestionCache},
        session::SessionManager,
    },
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub thresholds: AnalyticsThresholds,
    /// Used when an exam does not configure its own limit.
    pub default_max_repetitions: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            thresholds: AnalyticsThresholds::default(),
            default_max_repetitions: 2,
        }
    }
}

/// DTO for requesting a question set. Unset fields fall back to the exam's
/// configuration.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct GenerateQuestionsRequest {
    pub distribution: Option<DifficultyDistribution>,
    pub shuffle: Option<bool>,
    pub is_repetition: bool,
    #[validate(length(max = 50))]
    pub categories: Option<Vec<String>>,
    #[validate(length(max = 50))]
    pub tags: Option<Vec<String>>,
}

pub struct ExamEngine {
    store: Arc<dyn ExamStore>,
    cache: Arc<QuestionCache>,
    allocation: AllocationService,
    sessions: SessionManager,
    config: EngineConfig,
}

impl ExamEngine {
    pub fn new(
        store: Arc<dyn ExamStore>,
        repository: Arc<dyn QuestionRepository>,
        access: Arc<dyn AccessPolicy>,
        config: EngineConfig,
    ) -> Self {
        let cache = Arc::new(QuestionCache::new(repository.clone(), config.cache.clone()));
        let allocation = AllocationService::new(cache.clone(), repository.clone(), store.clone());
        let sessions = SessionManager::new(store.clone(), repository, access, config.thresholds);

        Self {
            store,
            cache,
            allocation,
            sessions,
            config,
        }
    }

    async fn available_exam(&self, exam_id: i64) -> Result<Exam, AppError> {
        self.store
            .find_exam(exam_id)
            .await?
            .filter(|e| e.is_available())
            .ok_or_else(|| AppError::NotFound("Exam not found or not available".to_string()))
    }

    /// Draws a fresh snapshot, or replays the purchased one on repetition.
    pub async fn generate_questions(
        &self,
        exam_id: i64,
        user_id: i64,
        request: GenerateQuestionsRequest,
    ) -> Result<Allocation, AppError> {
        request.validate()?;
        let exam = self.available_exam(exam_id).await?;
        let exam_config = exam.configuration;

        let distribution = request
            .distribution
            .or(exam_config.distribution)
            .unwrap_or_default();
        if !request.is_repetition {
            distribution.validate_against(exam_config.total_questions)?;
        }

        let max_repetitions = match exam_config.max_repetitions {
            0 => self.config.default_max_repetitions,
            n => n,
        };
        let config = AllocationConfig {
            shuffle: request.shuffle.unwrap_or(exam_config.shuffle_questions),
            max_repetitions,
            categories: request.categories.unwrap_or(exam_config.categories),
            tags: request.tags.unwrap_or(exam_config.tags),
        };

        self.allocation
            .allocate(&AllocationRequest {
                user_id,
                exam_id,
                subject_id: exam.subject_id,
                distribution,
                config,
                is_repetition: request.is_repetition,
            })
            .await
    }

    pub async fn start_session(&self, exam_id: i64, user_id: i64) -> Result<ExamSession, AppError> {
        self.sessions.start(exam_id, user_id).await
    }

    pub async fn get_session(&self, session_id: Uuid, user_id: i64) -> Result<ExamSession, AppError> {
        self.sessions.get(session_id, user_id).await
    }

    pub async fn submit_answer(
        &self,
        session_id: Uuid,
        user_id: i64,
        request: SubmitAnswerRequest,
    ) -> Result<ExamSession, AppError> {
        self.sessions.submit_answer(session_id, user_id, request).await
    }

    pub async fn pause_session(&self, session_id: Uuid, user_id: i64) -> Result<ExamSession, AppError> {
        self.sessions.pause(session_id, user_id).await
    }

    pub async fn resume_session(&self, session_id: Uuid, user_id: i64) -> Result<ExamSession, AppError> {
        self.sessions.resume(session_id, user_id).await
    }

    pub async fn finish_session(
        &self,
        session_id: Uuid,
        user_id: i64,
    ) -> Result<(ExamSession, ExamResult), AppError> {
        self.sessions.finish(session_id, user_id).await
    }

    pub async fn get_result(&self, session_id: Uuid, user_id: i64) -> Result<ExamResult, AppError> {
        self.sessions.result(session_id, user_id).await
    }

    pub async fn finish_expired_sessions(&self) -> Result<usize, AppError> {
        self.sessions.finish_expired(chrono::Utc::now()).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn invalidate_subject(&self, subject_id: i64) -> usize {
        self.cache.invalidate_subject(subject_id)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}
