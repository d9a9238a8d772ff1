// src/services/scoring.rs

use std::collections::{BTreeSet, HashMap};

use crate::models::{
    exam::DifficultyWeights,
    exam_record::{QuestionResult, ResultStatus},
    question::{QuestionSnapshot, QuestionType},
    session::Answer,
};

/// Totals produced by [`score`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub score: u32,
    pub max_score: u32,
    pub percentage: u32,
    pub correct_answers: u32,
    pub incorrect_answers: u32,
    pub unanswered_questions: u32,
    pub result_status: ResultStatus,
    pub detailed_results: Vec<QuestionResult>,
}

fn normalized_set(values: &[String]) -> BTreeSet<String> {
    values.iter().map(|v| v.trim().to_string()).collect()
}

/// Compares an answer with the question's correct-answer marker.
///
/// Choice questions need exactly the correct option set (order-insensitive).
/// Text questions accept any listed answer, ignoring case and surrounding
/// whitespace.
pub fn is_correct(question: &QuestionSnapshot, answer: &Answer) -> bool {
    match question.question_type {
        QuestionType::Text => match &answer.text_answer {
            Some(text) => {
                let given = text.trim().to_lowercase();
                !given.is_empty()
                    && question
                        .answer
                        .iter()
                        .any(|accepted| accepted.trim().to_lowercase() == given)
            }
            None => false,
        },
        QuestionType::Single | QuestionType::Multiple => match &answer.selected_options {
            Some(selected) if !selected.is_empty() => {
                normalized_set(selected) == normalized_set(&question.answer)
            }
            _ => false,
        },
    }
}

/// Scores a snapshot against the answers given.
///
/// Correct answers earn their difficulty's full weight; incorrect and
/// unanswered questions earn nothing. `percentage` is rounded to the nearest
/// integer and is 0 when nothing could be scored.
pub fn score(
    questions: &[QuestionSnapshot],
    answers: &HashMap<i64, Answer>,
    weights: &DifficultyWeights,
    passing_score: u32,
) -> ScoreOutcome {
    let mut score = 0;
    let mut max_score = 0;
    let mut correct_answers = 0;
    let mut unanswered_questions = 0;
    let mut detailed_results = Vec::with_capacity(questions.len());

    for question in questions {
        let weight = weights.weight(question.difficulty);
        max_score += weight;

        let answer = answers.get(&question.id);
        let correct = answer.is_some_and(|a| is_correct(question, a));
        let awarded = if correct { weight } else { 0 };

        if answer.is_none() {
            unanswered_questions += 1;
        }
        if correct {
            correct_answers += 1;
        }
        score += awarded;

        detailed_results.push(QuestionResult {
            question_id: question.id,
            difficulty: question.difficulty,
            category: question.category.clone(),
            answered: answer.is_some(),
            is_correct: correct,
            points_awarded: awarded,
            points_possible: weight,
            time_spent_seconds: answer.map_or(0, |a| a.time_spent_seconds),
            selected_options: answer.and_then(|a| a.selected_options.clone()),
            text_answer: answer.and_then(|a| a.text_answer.clone()),
            correct_answer: question.answer.clone(),
            review_marked: answer.is_some_and(|a| a.review_marked),
        });
    }

    let percentage = if max_score == 0 {
        0
    } else {
        (f64::from(score) * 100.0 / f64::from(max_score)).round() as u32
    };
    let result_status = if percentage >= passing_score {
        ResultStatus::Passed
    } else {
        ResultStatus::Failed
    };
    let total = questions.len() as u32;

    ScoreOutcome {
        score,
        max_score,
        percentage,
        correct_answers,
        incorrect_answers: total - correct_answers - unanswered_questions,
        unanswered_questions,
        result_status,
        detailed_results,
    }
}
