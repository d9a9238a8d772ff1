// src/handlers/cache.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use crate::engine::ExamEngine;

pub async fn cache_stats(State(engine): State<Arc<ExamEngine>>) -> impl IntoResponse {
    Json(engine.cache_stats())
}

/// Drops every cached pool of a subject after its question bank changed.
pub async fn invalidate_subject(
    State(engine): State<Arc<ExamEngine>>,
    Path(subject_id): Path<i64>,
) -> impl IntoResponse {
    let removed = engine.invalidate_subject(subject_id);
    tracing::info!(subject_id, removed, "cache invalidated for subject");
    Json(json!({ "subject_id": subject_id, "removed_entries": removed }))
}

pub async fn clear_cache(State(engine): State<Arc<ExamEngine>>) -> impl IntoResponse {
    engine.clear_cache();
    tracing::info!("question cache cleared");
    StatusCode::NO_CONTENT
}
