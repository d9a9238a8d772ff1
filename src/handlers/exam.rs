// src/handlers/exam.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;

use crate::{
    engine::{ExamEngine, GenerateQuestionsRequest},
    error::AppError,
    models::{purchase::RepetitionInfo, question::PublicQuestion},
    services::allocation::CacheInfo,
    utils::jwt::Claims,
};

/// Question set as handed to the participant. Answer keys stay server-side.
#[derive(Debug, Serialize)]
pub struct GenerateQuestionsResponse {
    pub questions: Vec<PublicQuestion>,
    pub cache_info: CacheInfo,
    pub repetition_info: RepetitionInfo,
}

/// Allocates the caller's question snapshot for an exam.
///
/// * First call draws a fresh set and records the purchase.
/// * `is_repetition: true` replays the recorded set and spends one repetition.
pub async fn generate_questions(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
    Json(req): Json<GenerateQuestionsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let allocation = engine.generate_questions(exam_id, user_id, req).await?;

    Ok(Json(GenerateQuestionsResponse {
        questions: allocation.questions.iter().map(PublicQuestion::from).collect(),
        cache_info: allocation.cache_info,
        repetition_info: allocation.repetition_info,
    }))
}

/// Starts (or returns the caller's open) session for the current attempt.
pub async fn start_session(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let session = engine.start_session(exam_id, user_id).await?;

    Ok((StatusCode::CREATED, Json(session)))
}
