// src/handlers/session.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    engine::ExamEngine,
    error::AppError,
    models::{
        exam_record::ExamResult,
        session::{ExamSession, SubmitAnswerRequest},
    },
    utils::jwt::Claims,
};

#[derive(Debug, Serialize)]
pub struct FinishSessionResponse {
    pub session: ExamSession,
    pub result: ExamResult,
}

pub async fn get_session(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = engine.get_session(session_id, claims.user_id()?).await?;
    Ok(Json(session))
}

/// Upserts one answer. Re-submitting for the same question replaces it.
pub async fn submit_answer(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = engine
        .submit_answer(session_id, claims.user_id()?, req)
        .await?;
    Ok(Json(session))
}

pub async fn pause_session(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = engine.pause_session(session_id, claims.user_id()?).await?;
    Ok(Json(session))
}

pub async fn resume_session(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = engine.resume_session(session_id, claims.user_id()?).await?;
    Ok(Json(session))
}

/// Scores the session and returns it together with its result.
pub async fn finish_session(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (session, result) = engine
        .finish_session(session_id, claims.user_id()?)
        .await?;
    Ok(Json(FinishSessionResponse { session, result }))
}

pub async fn get_result(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let result = engine.get_result(session_id, claims.user_id()?).await?;
    Ok(Json(result))
}
