// src/models/exam.rs

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::question::Difficulty;

/// An exam as authored elsewhere. Read-only for this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,
    pub subject_id: i64,
    pub title: String,
    pub is_published: bool,
    pub is_active: bool,
    pub configuration: ExamConfiguration,
}

impl Exam {
    pub fn is_available(&self) -> bool {
        self.is_published && self.is_active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamConfiguration {
    pub total_questions: u32,
    pub time_limit_minutes: Option<u32>,
    /// Minimum percentage (0-100) needed to pass.
    pub passing_score: u32,
    pub weights: DifficultyWeights,
    pub shuffle_questions: bool,
    pub max_repetitions: u32,
    /// Default distribution used when a request does not supply one.
    pub distribution: Option<DifficultyDistribution>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub pricing: Pricing,
}

impl Default for ExamConfiguration {
    fn default() -> Self {
        Self {
            total_questions: 10,
            time_limit_minutes: None,
            passing_score: 60,
            weights: DifficultyWeights::default(),
            shuffle_questions: false,
            max_repetitions: 2,
            distribution: None,
            categories: Vec::new(),
            tags: Vec::new(),
            pricing: Pricing::default(),
        }
    }
}

/// Points awarded per correctly answered question, by difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyWeights {
    pub easy: u32,
    pub medium: u32,
    pub hard: u32,
}

impl Default for DifficultyWeights {
    fn default() -> Self {
        Self {
            easy: 1,
            medium: 2,
            hard: 3,
        }
    }
}

impl DifficultyWeights {
    pub fn weight(&self, difficulty: Difficulty) -> u32 {
        match difficulty {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
        }
    }
}

/// Price shown to a caller who is denied access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub price_cents: i64,
    pub currency: String,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            price_cents: 0,
            currency: "USD".to_string(),
        }
    }
}

/// Required number of questions per difficulty tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyDistribution {
    pub easy: u32,
    pub medium: u32,
    pub hard: u32,
}

impl DifficultyDistribution {
    pub fn count(&self, difficulty: Difficulty) -> u32 {
        match difficulty {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
        }
    }

    /// Widened so request-supplied counts cannot overflow.
    pub fn total(&self) -> u64 {
        u64::from(self.easy) + u64::from(self.medium) + u64::from(self.hard)
    }

    /// The distribution must account for exactly the exam's question count.
    pub fn validate_against(&self, total_questions: u32) -> Result<(), AppError> {
        let total = self.total();
        if total != u64::from(total_questions) {
            return Err(AppError::Validation(format!(
                "Distribution sums to {} but the exam requires {} questions",
                total, total_questions
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_must_match_total() {
        let d = DifficultyDistribution {
            easy: 5,
            medium: 3,
            hard: 2,
        };
        assert!(d.validate_against(10).is_ok());
        assert!(matches!(
            d.validate_against(12),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn oversized_counts_are_rejected_not_wrapped() {
        let d = DifficultyDistribution {
            easy: u32::MAX,
            medium: 11,
            hard: 0,
        };
        assert_eq!(d.total(), u64::from(u32::MAX) + 11);
        assert!(matches!(
            d.validate_against(10),
            Err(AppError::Validation(_))
        ));

        let all_max = DifficultyDistribution {
            easy: u32::MAX,
            medium: u32::MAX,
            hard: u32::MAX,
        };
        assert!(all_max.validate_against(u32::MAX).is_err());
    }

    #[test]
    fn configuration_deserializes_with_defaults() {
        let config: ExamConfiguration =
            serde_json::from_str(r#"{"total_questions": 4, "passing_score": 75}"#).unwrap();
        assert_eq!(config.total_questions, 4);
        assert_eq!(config.passing_score, 75);
        assert_eq!(config.max_repetitions, 2);
        assert_eq!(config.weights.weight(Difficulty::Hard), 3);
    }
}
