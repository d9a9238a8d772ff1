// src/models/question.rs

use std::{fmt, mem, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Difficulty tier of a question. Drives both distribution and scoring weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Tiers in the order buckets are drawn and reported.
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(AppError::Validation(format!("Unknown difficulty '{}'", other))),
        }
    }
}

/// Question type: 'single' (single choice), 'multiple' (multiple choice) or
/// 'text' (free-form answer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Single,
    Multiple,
    Text,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Single => "single",
            QuestionType::Multiple => "multiple",
            QuestionType::Text => "text",
        }
    }
}

impl FromStr for QuestionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(QuestionType::Single),
            "multiple" => Ok(QuestionType::Multiple),
            "text" => Ok(QuestionType::Text),
            other => Err(AppError::Validation(format!("Unknown question type '{}'", other))),
        }
    }
}

/// Denormalized question content: everything needed to display and score a
/// question without going back to the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSnapshot {
    pub id: i64,
    pub subject_id: i64,

    #[serde(rename = "type")]
    pub question_type: QuestionType,

    /// The text content of the question.
    pub content: String,

    /// List of options (e.g., ["A", "B", "C"]). Empty for text questions.
    pub options: Vec<String>,

    /// Correct-answer marker(s). One entry for single choice and text
    /// questions, one or more for multiple choice.
    pub answer: Vec<String>,

    /// Explanation or analysis of the correct answer.
    pub analysis: Option<String>,

    pub difficulty: Difficulty,
    pub category: String,
    pub tags: Vec<String>,
}

impl QuestionSnapshot {
    /// Approximate heap + inline footprint, used for cache accounting.
    pub fn estimated_size(&self) -> usize {
        let strings = |v: &[String]| v.iter().map(|s| s.len() + mem::size_of::<String>()).sum::<usize>();

        mem::size_of::<Self>()
            + self.content.len()
            + strings(&self.options)
            + strings(&self.answer)
            + self.analysis.as_ref().map_or(0, |a| a.len())
            + self.category.len()
            + strings(&self.tags)
    }
}

/// DTO for sending question to client (excludes answer and analysis).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: i64,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub content: String,
    pub options: Vec<String>,
    pub difficulty: Difficulty,
    pub category: String,
    pub tags: Vec<String>,
}

impl From<&QuestionSnapshot> for PublicQuestion {
    fn from(q: &QuestionSnapshot) -> Self {
        Self {
            id: q.id,
            question_type: q.question_type,
            content: q.content.clone(),
            options: q.options.clone(),
            difficulty: q.difficulty,
            category: q.category.clone(),
            tags: q.tags.clone(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_parses_its_own_names() {
        for d in Difficulty::ALL {
            assert_eq!(d.as_str().parse::<Difficulty>().unwrap(), d);
        }
        assert!("extreme".parse::<Difficulty>().is_err());
    }

    #[test]
    fn question_type_parses_its_own_names() {
        for t in [QuestionType::Single, QuestionType::Multiple, QuestionType::Text] {
            assert_eq!(t.as_str().parse::<QuestionType>().unwrap(), t);
        }
        assert!(matches!("essay".parse::<QuestionType>(), Err(AppError::Validation(_))));
    }

    #[test]
    fn estimated_size_grows_with_content() {
        let small = fixtures::question(1, Difficulty::Easy, "math");
        let mut large = small.clone();
        large.content = "x".repeat(1024);
        assert!(large.estimated_size() > small.estimated_size() + 1000);
    }

    #[test]
    fn public_question_hides_answer() {
        let q = fixtures::question(7, Difficulty::Hard, "history");
        let json = serde_json::to_value(PublicQuestion::from(&q)).unwrap();
        assert!(json.get("answer").is_none());
        assert_eq!(json["type"], "single");
        assert_eq!(json["difficulty"], "hard");
    }
}
