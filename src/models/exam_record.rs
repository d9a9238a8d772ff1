// src/models/exam_record.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{analytics::Analytics, question::Difficulty};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Passed,
    Failed,
}

/// Outcome of one snapshot question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: i64,
    pub difficulty: Difficulty,
    pub category: String,
    pub answered: bool,
    pub is_correct: bool,
    pub points_awarded: u32,
    pub points_possible: u32,
    pub time_spent_seconds: u32,
    pub selected_options: Option<Vec<String>>,
    pub text_answer: Option<String>,
    pub correct_answer: Vec<String>,
    pub review_marked: bool,
}

/// The scored outcome of a completed session.
/// Created once, when the session completes, and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamResult {
    pub session_id: Uuid,
    pub exam_id: i64,
    pub participant_id: i64,
    pub score: u32,
    pub max_score: u32,
    pub percentage: u32,
    pub correct_answers: u32,
    pub incorrect_answers: u32,
    pub unanswered_questions: u32,
    pub result_status: ResultStatus,
    /// In snapshot order.
    pub detailed_results: Vec<QuestionResult>,
    pub analytics: Analytics,
    pub completed_at: DateTime<Utc>,
}
