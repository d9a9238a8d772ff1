// src/models/purchase.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's purchase of an exam together with the question snapshot it was
/// sold with. Only `repetition_count` ever changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub user_id: i64,
    pub exam_id: i64,
    pub subject_id: i64,

    /// Snapshot question ids, in the order they were first presented.
    pub question_ids: Vec<i64>,

    pub repetition_count: u32,
    pub max_repetitions: u32,
    pub purchased_at: DateTime<Utc>,
}

impl PurchaseRecord {
    pub fn new(
        user_id: i64,
        exam_id: i64,
        subject_id: i64,
        question_ids: Vec<i64>,
        max_repetitions: u32,
    ) -> Self {
        Self {
            user_id,
            exam_id,
            subject_id,
            question_ids,
            repetition_count: 1,
            max_repetitions,
            purchased_at: Utc::now(),
        }
    }

    pub fn can_repeat(&self) -> bool {
        self.repetition_count < self.max_repetitions
    }

    pub fn repetition_info(&self) -> RepetitionInfo {
        RepetitionInfo {
            current_repetition: self.repetition_count,
            max_repetitions: self.max_repetitions,
            remaining_repetitions: self.max_repetitions.saturating_sub(self.repetition_count),
            can_repeat: self.can_repeat(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepetitionInfo {
    pub current_repetition: u32,
    pub max_repetitions: u32,
    pub remaining_repetitions: u32,
    pub can_repeat: bool,
}
