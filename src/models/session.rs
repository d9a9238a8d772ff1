// src/models/session.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "NOT_STARTED",
            SessionStatus::InProgress => "IN_PROGRESS",
            SessionStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "NOT_STARTED" => Ok(SessionStatus::NotStarted),
            "IN_PROGRESS" => Ok(SessionStatus::InProgress),
            "COMPLETED" => Ok(SessionStatus::Completed),
            other => Err(AppError::Internal(format!("Unknown session status '{}'", other))),
        }
    }
}

/// A participant's answer to one question. Upserted by `question_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: i64,
    pub selected_options: Option<Vec<String>>,
    pub text_answer: Option<String>,
    pub time_spent_seconds: u32,
    pub answered_at: DateTime<Utc>,
    pub review_marked: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub questions_answered: u32,
    pub time_spent_seconds: u64,
    pub pause_count: u32,
    pub pause_duration_seconds: u64,
}

/// One attempt at an exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamSession {
    pub id: Uuid,
    pub exam_id: i64,
    pub participant_id: i64,
    pub status: SessionStatus,

    /// Snapshot the session was admitted against.
    pub question_ids: Vec<i64>,
    /// Purchase repetition this attempt belongs to (1 = first sitting).
    pub attempt: u32,

    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub time_limit_seconds: Option<u32>,
    pub time_remaining_seconds: Option<i64>,
    pub paused_at: Option<DateTime<Utc>>,

    pub answers: HashMap<i64, Answer>,
    pub counters: SessionCounters,
}

impl ExamSession {
    pub fn start(
        exam_id: i64,
        participant_id: i64,
        question_ids: Vec<i64>,
        attempt: u32,
        time_limit_seconds: Option<u32>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            exam_id,
            participant_id,
            status: SessionStatus::InProgress,
            question_ids,
            attempt,
            start_time: now,
            end_time: None,
            time_limit_seconds,
            time_remaining_seconds: time_limit_seconds.map(i64::from),
            paused_at: None,
            answers: HashMap::new(),
            counters: SessionCounters::default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn ensure_participant(&self, caller_id: i64) -> Result<(), AppError> {
        if self.participant_id != caller_id {
            return Err(AppError::Forbidden(
                "Session belongs to another participant".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ensure_in_progress(&self) -> Result<(), AppError> {
        if self.status != SessionStatus::InProgress {
            return Err(AppError::InvalidState(format!(
                "Session is {}, expected IN_PROGRESS",
                self.status.as_str()
            )));
        }
        Ok(())
    }

    /// Inserts or replaces the answer for its question and recomputes the
    /// counters from the answer set, so retries cannot inflate them.
    pub fn upsert_answer(&mut self, answer: Answer) -> Result<(), AppError> {
        self.ensure_in_progress()?;
        if self.is_paused() {
            return Err(AppError::InvalidState("Session is paused".to_string()));
        }
        if !self.question_ids.contains(&answer.question_id) {
            return Err(AppError::Validation(format!(
                "Question {} is not part of this session",
                answer.question_id
            )));
        }

        self.answers.insert(answer.question_id, answer);
        self.recompute_counters();
        Ok(())
    }

    fn recompute_counters(&mut self) {
        self.counters.questions_answered = self.answers.len() as u32;
        self.counters.time_spent_seconds = self
            .answers
            .values()
            .map(|a| u64::from(a.time_spent_seconds))
            .sum();
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.ensure_in_progress()?;
        if self.is_paused() {
            return Err(AppError::InvalidState("Session is already paused".to_string()));
        }
        self.paused_at = Some(now);
        self.counters.pause_count += 1;
        self.refresh_time_remaining(now);
        Ok(())
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.ensure_in_progress()?;
        if !self.is_paused() {
            return Err(AppError::InvalidState("Session is not paused".to_string()));
        }
        self.close_pause(now);
        self.refresh_time_remaining(now);
        Ok(())
    }

    fn close_pause(&mut self, now: DateTime<Utc>) {
        if let Some(paused_at) = self.paused_at.take() {
            let paused = (now - paused_at).num_seconds().max(0) as u64;
            self.counters.pause_duration_seconds += paused;
        }
    }

    /// Wall-clock seconds since start, minus paused time.
    pub fn active_seconds(&self, now: DateTime<Utc>) -> i64 {
        let end = self.end_time.unwrap_or(now);
        let current_pause = self
            .paused_at
            .map_or(0, |p| (end - p).num_seconds().max(0));
        let elapsed = (end - self.start_time).num_seconds()
            - self.counters.pause_duration_seconds as i64
            - current_pause;
        elapsed.max(0)
    }

    pub fn refresh_time_remaining(&mut self, now: DateTime<Utc>) {
        self.time_remaining_seconds = self
            .time_limit_seconds
            .map(|limit| (i64::from(limit) - self.active_seconds(now)).max(0));
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.time_limit_seconds {
            Some(limit) => {
                self.status == SessionStatus::InProgress
                    && self.active_seconds(now) >= i64::from(limit)
            }
            None => false,
        }
    }

    /// Moves the session to its terminal state.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.ensure_in_progress()?;
        self.close_pause(now);
        self.refresh_time_remaining(now);
        self.status = SessionStatus::Completed;
        self.end_time = Some(now);
        Ok(())
    }
}

/// DTO for submitting one answer.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    pub question_id: i64,
    #[validate(length(max = 26))]
    pub selected_options: Option<Vec<String>>,
    #[validate(length(max = 5000))]
    pub text_answer: Option<String>,
    #[validate(range(max = 86400))]
    #[serde(default)]
    pub time_spent_seconds: u32,
    #[serde(default)]
    pub review_marked: bool,
}

impl SubmitAnswerRequest {
    pub fn into_answer(self, now: DateTime<Utc>) -> Answer {
        Answer {
            question_id: self.question_id,
            selected_options: self.selected_options,
            text_answer: self.text_answer,
            time_spent_seconds: self.time_spent_seconds,
            answered_at: now,
            review_marked: self.review_marked,
        }
    }
}
