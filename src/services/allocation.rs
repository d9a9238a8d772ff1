// src/services/allocation.rs

use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::AppError,
    models::{
        exam::DifficultyDistribution,
        purchase::{PurchaseRecord, RepetitionInfo},
        question::{Difficulty, QuestionSnapshot},
    },
    repository::{ExamStore, QuestionRepository, resolve_snapshot},
    services::cache::{CacheKey, QuestionCache},
};

/// How a snapshot should be drawn and presented.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    pub shuffle: bool,
    pub max_repetitions: u32,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            shuffle: false,
            max_repetitions: 2,
            categories: Vec::new(),
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub user_id: i64,
    pub exam_id: i64,
    pub subject_id: i64,
    pub distribution: DifficultyDistribution,
    pub config: AllocationConfig,
    pub is_repetition: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLookupType {
    /// Every bucket was served from cache.
    Hit,
    /// Every bucket needed the repository.
    Miss,
    /// Some buckets hit, some missed.
    Partial,
    /// Replayed from the stored purchase snapshot.
    Snapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    #[serde(rename = "type")]
    pub lookup_type: CacheLookupType,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Allocation {
    pub questions: Vec<QuestionSnapshot>,
    pub cache_info: CacheInfo,
    pub repetition_info: RepetitionInfo,
}

fn shuffle_questions(questions: &mut [QuestionSnapshot]) {
    questions.shuffle(&mut rand::rng());
}

/// Draws, persists and replays per-user question snapshots.
pub struct AllocationService {
    cache: Arc<QuestionCache>,
    repository: Arc<dyn QuestionRepository>,
    store: Arc<dyn ExamStore>,
}

impl AllocationService {
    pub fn new(
        cache: Arc<QuestionCache>,
        repository: Arc<dyn QuestionRepository>,
        store: Arc<dyn ExamStore>,
    ) -> Self {
        Self {
            cache,
            repository,
            store,
        }
    }

    pub async fn allocate(&self, request: &AllocationRequest) -> Result<Allocation, AppError> {
        if request.is_repetition {
            self.replay(request).await
        } else {
            self.purchase(request).await
        }
    }

    /// First allocation: draw every difficulty bucket through the cache and
    /// store the resulting snapshot.
    async fn purchase(&self, request: &AllocationRequest) -> Result<Allocation, AppError> {
        if self
            .store
            .find_purchase(request.user_id, request.exam_id)
            .await?
            .is_some()
        {
            warn!(
                user_id = request.user_id,
                exam_id = request.exam_id,
                "rejected fresh allocation for an existing purchase"
            );
            return Err(AppError::DuplicatePurchase {
                user_id: request.user_id,
                exam_id: request.exam_id,
            });
        }

        let mut questions = Vec::new();
        let (mut lookups, mut hits) = (0, 0);

        for difficulty in Difficulty::ALL {
            let count = request.distribution.count(difficulty) as usize;
            if count == 0 {
                continue;
            }
            let key = CacheKey::new(
                request.subject_id,
                &request.config.categories,
                difficulty,
                &request.config.tags,
            );
            let lookup = self.cache.get(&key, count).await?;
            lookups += 1;
            if lookup.hit {
                hits += 1;
            }
            questions.extend(lookup.questions);
        }

        if request.config.shuffle {
            shuffle_questions(&mut questions);
        }

        let record = PurchaseRecord::new(
            request.user_id,
            request.exam_id,
            request.subject_id,
            questions.iter().map(|q| q.id).collect(),
            request.config.max_repetitions,
        );
        // Create-if-absent: a concurrent first allocation loses here.
        self.store.insert_purchase(&record).await?;

        let lookup_type = match hits {
            h if h == lookups => CacheLookupType::Hit,
            0 => CacheLookupType::Miss,
            _ => CacheLookupType::Partial,
        };
        info!(
            user_id = request.user_id,
            exam_id = request.exam_id,
            questions = questions.len(),
            ?lookup_type,
            "allocated question snapshot"
        );

        Ok(Allocation {
            questions,
            cache_info: CacheInfo {
                lookup_type,
                hit_rate: self.cache.stats().hit_rate,
            },
            repetition_info: record.repetition_info(),
        })
    }

    /// Repetition: same question set as the original purchase, bounded by
    /// `max_repetitions`.
    async fn replay(&self, request: &AllocationRequest) -> Result<Allocation, AppError> {
        let record = self
            .store
            .find_purchase(request.user_id, request.exam_id)
            .await?
            .ok_or_else(|| AppError::NotFound("No purchase record for this exam".to_string()))?;

        if !record.can_repeat() {
            warn!(
                user_id = request.user_id,
                exam_id = request.exam_id,
                "repetition limit reached"
            );
            return Err(AppError::MaxRepetitionsExceeded {
                max_repetitions: record.max_repetitions,
            });
        }

        // Resolve before spending a repetition.
        let mut questions = resolve_snapshot(self.repository.as_ref(), &record.question_ids).await?;

        // Authoritative check-and-increment.
        let record = self
            .store
            .increment_repetition(request.user_id, request.exam_id)
            .await?;

        if request.config.shuffle {
            shuffle_questions(&mut questions);
        }
        info!(
            user_id = request.user_id,
            exam_id = request.exam_id,
            repetition = record.repetition_count,
            "replayed question snapshot"
        );

        Ok(Allocation {
            questions,
            cache_info: CacheInfo {
                lookup_type: CacheLookupType::Snapshot,
                hit_rate: self.cache.stats().hit_rate,
            },
            repetition_info: record.repetition_info(),
        })
    }
}
