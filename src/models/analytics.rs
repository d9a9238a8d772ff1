// src/models/analytics.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-bucket tallies (one difficulty level or one category).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub total: u32,
    pub correct: u32,
    pub percentage: f64,
    pub average_time_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionTiming {
    pub question_id: i64,
    pub seconds: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeAnalysis {
    pub average_time_per_question: f64,
    pub fastest_question: Option<QuestionTiming>,
    pub slowest_question: Option<QuestionTiming>,
    /// Correct answers per minute of answering time.
    pub efficiency: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub accuracy: f64,
    /// Questions per minute.
    pub speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightDimension {
    Difficulty,
    Category,
}

/// A bucket that crossed the strength or weakness threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub dimension: InsightDimension,
    pub name: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub difficulty_breakdown: BTreeMap<String, Breakdown>,
    pub category_breakdown: BTreeMap<String, Breakdown>,
    pub time_analysis: TimeAnalysis,
    pub performance: PerformanceMetrics,
    pub strengths: Vec<Insight>,
    pub weaknesses: Vec<Insight>,
}
